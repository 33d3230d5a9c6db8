use chrono::{DateTime, Utc};
use derive_more::Display;
use fxfloor_instrument::{Direction, InstrumentSymbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Supported order kinds.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    #[display("market")]
    Market,
    #[display("limit")]
    Limit,
    #[display("stop")]
    Stop,
    #[display("oco")]
    Oco,
}

/// Time in force attached to an order on submission.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum TimeInForce {
    /// Market orders fill completely or not at all.
    #[serde(rename = "FOK")]
    #[display("FOK")]
    FillOrKill,
    /// Limit and stop orders rest until cancelled.
    #[serde(rename = "GTC")]
    #[display("GTC")]
    GoodUntilCancelled,
}

/// Lifecycle status of an order row.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[display("pending")]
    Pending,
    #[display("filled")]
    Filled,
    #[display("cancelled")]
    Cancelled,
    #[display("rejected")]
    Rejected,
}

/// Persisted order row, owned by a [`BrokerAccount`](crate::account::BrokerAccount).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderRecord {
    pub account_id: SmolStr,
    /// Broker-assigned order id.
    pub broker_order_id: SmolStr,
    pub instrument: InstrumentSymbol,
    pub kind: OrderKind,
    pub direction: Direction,
    /// Always positive; the direction carries the sign.
    pub units: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<Decimal>,
}

impl OrderRecord {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}
