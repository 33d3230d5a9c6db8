use crate::{account::Jurisdiction, order::OrderKind};
use fxfloor_instrument::InstrumentSymbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A compliance rejection. Never retried; surfaced to the caller and audited.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
#[error("{0}")]
pub struct ComplianceViolation(pub String);

/// Order intent validated against the jurisdiction rule set before submission.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OrderIntent {
    pub instrument: InstrumentSymbol,
    pub kind: OrderKind,
    /// Signed: positive long, negative short.
    pub units: i64,
    pub price: Option<Decimal>,
}

/// Jurisdiction rule set.
///
/// Netting jurisdictions additionally force FIFO close ordering in the strategy
/// layer; here we gate order size and leverage-sensitive order kinds.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ComplianceRules {
    pub jurisdiction: Jurisdiction,
    pub min_units: i64,
    pub max_units: i64,
    pub fifo_required: bool,
    /// OCO pairs are disallowed where the regulator treats the second leg as a
    /// hedge of the first.
    pub allow_oco: bool,
}

impl ComplianceRules {
    /// Rule set for a jurisdiction.
    pub fn for_jurisdiction(jurisdiction: Jurisdiction) -> Self {
        match jurisdiction {
            Jurisdiction::UnitedStates => Self {
                jurisdiction,
                min_units: 1,
                max_units: 10_000_000,
                fifo_required: true,
                allow_oco: false,
            },
            Jurisdiction::Japan => Self {
                jurisdiction,
                min_units: 1,
                max_units: 50_000_000,
                fifo_required: false,
                allow_oco: true,
            },
            Jurisdiction::Other => Self {
                jurisdiction,
                min_units: 1,
                max_units: 50_000_000,
                fifo_required: false,
                allow_oco: true,
            },
        }
    }

    /// Validate an order intent, returning the violation on failure.
    pub fn validate(&self, intent: &OrderIntent) -> Result<(), ComplianceViolation> {
        let magnitude = intent.units.abs();
        if magnitude == 0 {
            return Err(ComplianceViolation("order units must be non-zero".into()));
        }
        if magnitude < self.min_units {
            return Err(ComplianceViolation(format!(
                "order size {magnitude} below jurisdiction minimum {}",
                self.min_units
            )));
        }
        if magnitude > self.max_units {
            return Err(ComplianceViolation(format!(
                "order size {magnitude} above jurisdiction maximum {}",
                self.max_units
            )));
        }
        if intent.kind == OrderKind::Oco && !self.allow_oco {
            return Err(ComplianceViolation(format!(
                "OCO orders are not permitted in {}",
                self.jurisdiction
            )));
        }
        if matches!(intent.kind, OrderKind::Limit | OrderKind::Stop) && intent.price.is_none() {
            return Err(ComplianceViolation(format!(
                "{} orders require a price",
                intent.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(kind: OrderKind, units: i64, price: Option<Decimal>) -> OrderIntent {
        OrderIntent {
            instrument: InstrumentSymbol::new("EUR_USD"),
            kind,
            units,
            price,
        }
    }

    #[test]
    fn test_size_limits_enforced() {
        let rules = ComplianceRules::for_jurisdiction(Jurisdiction::UnitedStates);
        assert!(rules.validate(&intent(OrderKind::Market, 1000, None)).is_ok());
        assert!(rules.validate(&intent(OrderKind::Market, 0, None)).is_err());
        assert!(
            rules
                .validate(&intent(OrderKind::Market, 10_000_001, None))
                .is_err()
        );
    }

    #[test]
    fn test_oco_blocked_in_us() {
        let us = ComplianceRules::for_jurisdiction(Jurisdiction::UnitedStates);
        let jp = ComplianceRules::for_jurisdiction(Jurisdiction::Japan);
        let oco = intent(OrderKind::Oco, 1000, Some(Decimal::ONE));
        assert!(us.validate(&oco).is_err());
        assert!(jp.validate(&oco).is_ok());
    }

    #[test]
    fn test_resting_orders_require_price() {
        let rules = ComplianceRules::for_jurisdiction(Jurisdiction::Japan);
        assert!(rules.validate(&intent(OrderKind::Limit, 1000, None)).is_err());
        assert!(
            rules
                .validate(&intent(OrderKind::Limit, 1000, Some(Decimal::ONE)))
                .is_ok()
        );
    }

    #[test]
    fn test_short_orders_use_magnitude() {
        let rules = ComplianceRules::for_jurisdiction(Jurisdiction::Japan);
        assert!(rules.validate(&intent(OrderKind::Market, -5000, None)).is_ok());
    }
}
