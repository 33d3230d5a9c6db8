use crate::{error::ExecutionError, order::{OrderKind, TimeInForce}};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use fxfloor_instrument::InstrumentSymbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::Debug;

/// OANDA v20 client.
pub mod oanda;

/// Scriptable mock client used for testing.
pub mod mock;

/// Order submission request forwarded to the broker.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BrokerOrderRequest {
    pub instrument: InstrumentSymbol,
    /// Signed: positive long, negative short.
    pub units: i64,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
}

/// Successful broker response to an order submission.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum OrderOutcome {
    /// Market order filled immediately.
    Filled {
        broker_order_id: SmolStr,
        price: Decimal,
    },
    /// Resting order accepted by the broker.
    Created { broker_order_id: SmolStr },
}

impl OrderOutcome {
    pub fn broker_order_id(&self) -> &SmolStr {
        match self {
            OrderOutcome::Filled { broker_order_id, .. } => broker_order_id,
            OrderOutcome::Created { broker_order_id } => broker_order_id,
        }
    }
}

/// A pending order as reported by the broker.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BrokerOrder {
    pub id: SmolStr,
    pub instrument: InstrumentSymbol,
    pub kind: OrderKind,
    /// Signed units.
    pub units: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// One side of an open position as reported by the broker.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BrokerPositionSide {
    pub instrument: InstrumentSymbol,
    pub direction: fxfloor_instrument::Direction,
    /// Positive magnitude.
    pub units: Decimal,
    pub average_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Typed transaction from the broker's realtime stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum BrokerTransaction {
    OrderFill {
        transaction_id: SmolStr,
        order_id: SmolStr,
        instrument: InstrumentSymbol,
        /// Signed units.
        units: Decimal,
        price: Decimal,
        pl: Decimal,
        time: DateTime<Utc>,
    },
    OrderCancel {
        transaction_id: SmolStr,
        order_id: SmolStr,
        reason: String,
        time: DateTime<Utc>,
    },
    OrderReject {
        transaction_id: SmolStr,
        order_id: SmolStr,
        reason: String,
        time: DateTime<Utc>,
    },
    TradeClose {
        transaction_id: SmolStr,
        trade_id: SmolStr,
        instrument: InstrumentSymbol,
        units: Decimal,
        price: Decimal,
        pl: Decimal,
        time: DateTime<Utc>,
    },
    TradeReduce {
        transaction_id: SmolStr,
        trade_id: SmolStr,
        instrument: InstrumentSymbol,
        units: Decimal,
        price: Decimal,
        pl: Decimal,
        time: DateTime<Utc>,
    },
    Heartbeat {
        time: DateTime<Utc>,
    },
}

/// Broker API abstraction.
///
/// One instance is scoped to one brokerage account. The only concrete production
/// implementation is [`oanda::OandaClient`].
#[async_trait]
pub trait BrokerClient: Debug + Send + Sync {
    /// Submit an order. Broker-level rejections surface as
    /// [`ExecutionError::BrokerReject`].
    async fn create_order(
        &self,
        request: &BrokerOrderRequest,
    ) -> Result<OrderOutcome, ExecutionError>;

    /// Cancel a pending order.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError>;

    /// Pending orders on the account.
    async fn list_pending_orders(&self) -> Result<Vec<BrokerOrder>, ExecutionError>;

    /// Open positions on the account, one element per active side.
    async fn list_open_positions(&self) -> Result<Vec<BrokerPositionSide>, ExecutionError>;

    /// Open the account's realtime transaction stream. The stream ends when the
    /// broker closes the transport; callers reconnect with backoff.
    async fn transaction_stream(
        &self,
    ) -> Result<BoxStream<'static, Result<BrokerTransaction, ExecutionError>>, ExecutionError>;
}
