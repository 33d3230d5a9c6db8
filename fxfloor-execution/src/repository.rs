use crate::{
    error::RepositoryError,
    order::{OrderRecord, OrderStatus},
    position::PositionRecord,
};
use chrono::{DateTime, Utc};
use fxfloor_instrument::{Direction, InstrumentSymbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::{collections::HashMap, sync::Arc};

/// Storage interface for order rows.
///
/// Implementations wrap the relational store; the in-memory variant backs tests and
/// the mock broker.
pub trait OrderRepository: Send + Sync {
    fn upsert(&self, order: OrderRecord) -> Result<(), RepositoryError>;

    fn get(&self, account_id: &str, broker_order_id: &str)
    -> Result<Option<OrderRecord>, RepositoryError>;

    /// Orders still pending on the provided account.
    fn pending(&self, account_id: &str) -> Result<Vec<OrderRecord>, RepositoryError>;

    /// Transition an order's status, recording fill details where relevant.
    fn set_status(
        &self,
        account_id: &str,
        broker_order_id: &str,
        status: OrderStatus,
        filled_at: Option<DateTime<Utc>>,
        fill_price: Option<Decimal>,
    ) -> Result<(), RepositoryError>;
}

/// Storage interface for position rows.
pub trait PositionRepository: Send + Sync {
    fn upsert(&self, position: PositionRecord) -> Result<(), RepositoryError>;

    fn get(
        &self,
        account_id: &str,
        position_id: &str,
    ) -> Result<Option<PositionRecord>, RepositoryError>;

    /// Open positions on the provided account.
    fn open(&self, account_id: &str) -> Result<Vec<PositionRecord>, RepositoryError>;

    /// The open position for `(account, instrument, direction)`, if any.
    fn open_for(
        &self,
        account_id: &str,
        instrument: &InstrumentSymbol,
        direction: Direction,
    ) -> Result<Option<PositionRecord>, RepositoryError>;
}

/// In-memory [`OrderRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<Mutex<HashMap<(String, String), OrderRecord>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, helper used in tests.
    pub fn all(&self) -> Vec<OrderRecord> {
        self.orders.lock().values().cloned().collect()
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn upsert(&self, order: OrderRecord) -> Result<(), RepositoryError> {
        self.orders.lock().insert(
            (order.account_id.to_string(), order.broker_order_id.to_string()),
            order,
        );
        Ok(())
    }

    fn get(
        &self,
        account_id: &str,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, RepositoryError> {
        Ok(self
            .orders
            .lock()
            .get(&(account_id.to_string(), broker_order_id.to_string()))
            .cloned())
    }

    fn pending(&self, account_id: &str) -> Result<Vec<OrderRecord>, RepositoryError> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|order| order.account_id == account_id && order.is_pending())
            .cloned()
            .collect())
    }

    fn set_status(
        &self,
        account_id: &str,
        broker_order_id: &str,
        status: OrderStatus,
        filled_at: Option<DateTime<Utc>>,
        fill_price: Option<Decimal>,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&(account_id.to_string(), broker_order_id.to_string()))
            .ok_or_else(|| RepositoryError::NotFound(broker_order_id.to_string()))?;
        order.status = status;
        if filled_at.is_some() {
            order.filled_at = filled_at;
        }
        if fill_price.is_some() {
            order.fill_price = fill_price;
        }
        Ok(())
    }
}

/// In-memory [`PositionRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPositionRepository {
    positions: Arc<Mutex<HashMap<(String, String), PositionRecord>>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, helper used in tests.
    pub fn all(&self) -> Vec<PositionRecord> {
        self.positions.lock().values().cloned().collect()
    }
}

impl PositionRepository for InMemoryPositionRepository {
    fn upsert(&self, position: PositionRecord) -> Result<(), RepositoryError> {
        self.positions.lock().insert(
            (
                position.account_id.to_string(),
                position.position_id.to_string(),
            ),
            position,
        );
        Ok(())
    }

    fn get(
        &self,
        account_id: &str,
        position_id: &str,
    ) -> Result<Option<PositionRecord>, RepositoryError> {
        Ok(self
            .positions
            .lock()
            .get(&(account_id.to_string(), position_id.to_string()))
            .cloned())
    }

    fn open(&self, account_id: &str) -> Result<Vec<PositionRecord>, RepositoryError> {
        Ok(self
            .positions
            .lock()
            .values()
            .filter(|position| position.account_id == account_id && position.is_open())
            .cloned()
            .collect())
    }

    fn open_for(
        &self,
        account_id: &str,
        instrument: &InstrumentSymbol,
        direction: Direction,
    ) -> Result<Option<PositionRecord>, RepositoryError> {
        Ok(self
            .positions
            .lock()
            .values()
            .find(|position| {
                position.account_id == account_id
                    && position.instrument == *instrument
                    && position.direction == direction
                    && position.is_open()
            })
            .cloned())
    }
}
