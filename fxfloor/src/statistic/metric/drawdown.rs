use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum peak-to-trough decline over an equity curve, as a percentage of the
/// peak.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize)]
pub struct MaxDrawdown {
    pub value: Decimal,
}

impl MaxDrawdown {
    /// Calculate the [`MaxDrawdown`] over the provided equity balances, in order.
    pub fn calculate(balances: impl IntoIterator<Item = Decimal>) -> Self {
        let mut peak: Option<Decimal> = None;
        let mut max_drawdown = Decimal::ZERO;

        for balance in balances {
            let current_peak = match peak {
                Some(existing) if existing >= balance => existing,
                _ => {
                    peak = Some(balance);
                    balance
                }
            };
            if current_peak > Decimal::ZERO {
                let drawdown = (current_peak - balance) / current_peak * Decimal::ONE_HUNDRED;
                max_drawdown = max_drawdown.max(drawdown);
            }
        }

        Self {
            value: max_drawdown,
        }
    }
}
