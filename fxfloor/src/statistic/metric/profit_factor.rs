use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Gross profit divided by gross loss. Undefined without any losing trades.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize)]
pub struct ProfitFactor {
    pub value: Decimal,
}

impl ProfitFactor {
    /// Calculate the [`ProfitFactor`] from gross wins and the magnitude of gross
    /// losses. Returns `None` when there are no losses to divide by.
    pub fn calculate(gross_wins: Decimal, gross_losses: Decimal) -> Option<Self> {
        if gross_losses.is_zero() {
            return None;
        }
        Some(Self {
            value: gross_wins / gross_losses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_profit_factor() {
        let factor = ProfitFactor::calculate(dec!(12), dec!(4)).unwrap();
        assert_eq!(factor.value, dec!(3));
    }

    #[test]
    fn test_undefined_without_losses() {
        assert_eq!(ProfitFactor::calculate(dec!(12), Decimal::ZERO), None);
    }
}
