use chrono::{DateTime, Utc};
use fxfloor_instrument::{Direction, InstrumentSymbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Persisted live position row, owned by a
/// [`BrokerAccount`](crate::account::BrokerAccount).
///
/// Closed iff `closed_at` is set.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PositionRecord {
    pub account_id: SmolStr,
    pub position_id: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<SmolStr>,
    pub instrument: InstrumentSymbol,
    pub direction: Direction,
    pub units: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}
