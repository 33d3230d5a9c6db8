use serde::{Deserialize, Serialize};

/// Represents a Sharpe Ratio value over the sampling period of its inputs.
///
/// Sharpe Ratio measures the risk-adjusted return of an investment by comparing
/// its excess returns (over risk-free rate) to its standard deviation.
///
/// See docs: <https://www.investopedia.com/articles/07/sharpe_ratio.asp>
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
pub struct SharpeRatio {
    pub value: f64,
}

impl SharpeRatio {
    /// Calculate the [`SharpeRatio`] over the sampling period of the inputs.
    pub fn calculate(risk_free_return: f64, mean_return: f64, std_dev_returns: f64) -> Self {
        if std_dev_returns == 0.0 {
            Self {
                value: f64::INFINITY,
            }
        } else {
            Self {
                value: (mean_return - risk_free_return) / std_dev_returns,
            }
        }
    }

    /// Scale the [`SharpeRatio`] to an annual interval given the number of sampling
    /// periods per year.
    ///
    /// This scaling assumes the returns are independently and identically
    /// distributed (IID).
    pub fn annualise(self, periods_per_year: f64) -> Self {
        Self {
            value: self.value * periods_per_year.max(0.0).sqrt(),
        }
    }
}
