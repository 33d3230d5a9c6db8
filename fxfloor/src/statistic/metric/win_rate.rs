use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Percentage of winning trades.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize)]
pub struct WinRate {
    pub value: Decimal,
}

impl WinRate {
    /// Calculate the [`WinRate`] percentage. Zero when no trades closed.
    pub fn calculate(winning_trades: u64, total_trades: u64) -> Self {
        if total_trades == 0 {
            return Self {
                value: Decimal::ZERO,
            };
        }
        Self {
            value: Decimal::from(winning_trades) / Decimal::from(total_trades)
                * Decimal::ONE_HUNDRED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_win_rate() {
        assert_eq!(WinRate::calculate(2, 3).value.round_dp(2), dec!(66.67));
        assert_eq!(WinRate::calculate(0, 0).value, Decimal::ZERO);
        assert_eq!(WinRate::calculate(3, 3).value, dec!(100));
    }
}
