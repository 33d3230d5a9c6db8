use crate::{
    client::{
        BrokerClient, BrokerOrder, BrokerOrderRequest, BrokerPositionSide, BrokerTransaction,
        OrderOutcome,
    },
    error::ExecutionError,
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

/// Scriptable [`BrokerClient`] used for testing.
///
/// Order outcomes are popped from a queue; submissions, cancellations and stream
/// batches are recorded / replayed for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockBrokerClient {
    order_outcomes: Arc<Mutex<VecDeque<Result<OrderOutcome, ExecutionError>>>>,
    submitted: Arc<Mutex<Vec<BrokerOrderRequest>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    pending_orders: Arc<Mutex<Vec<BrokerOrder>>>,
    open_positions: Arc<Mutex<Vec<BrokerPositionSide>>>,
    transaction_batches: Arc<Mutex<VecDeque<Vec<Result<BrokerTransaction, ExecutionError>>>>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next `create_order` call.
    pub fn push_order_outcome(&self, outcome: Result<OrderOutcome, ExecutionError>) {
        self.order_outcomes.lock().push_back(outcome);
    }

    /// Set the pending orders returned by `list_pending_orders`.
    pub fn set_pending_orders(&self, orders: Vec<BrokerOrder>) {
        *self.pending_orders.lock() = orders;
    }

    /// Set the open positions returned by `list_open_positions`.
    pub fn set_open_positions(&self, positions: Vec<BrokerPositionSide>) {
        *self.open_positions.lock() = positions;
    }

    /// Queue a batch of transactions for the next `transaction_stream` connection.
    pub fn push_transaction_batch(&self, batch: Vec<Result<BrokerTransaction, ExecutionError>>) {
        self.transaction_batches.lock().push_back(batch);
    }

    /// Submitted order requests, oldest first.
    pub fn submitted(&self) -> Vec<BrokerOrderRequest> {
        self.submitted.lock().clone()
    }

    /// Cancelled order ids, oldest first.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn create_order(
        &self,
        request: &BrokerOrderRequest,
    ) -> Result<OrderOutcome, ExecutionError> {
        self.submitted.lock().push(request.clone());
        self.order_outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(OrderOutcome::Filled {
                    broker_order_id: smol_str::format_smolstr!(
                        "mock-{}",
                        self.submitted.lock().len()
                    ),
                    price: request.price.unwrap_or(rust_decimal::Decimal::ONE),
                })
            })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError> {
        self.cancelled.lock().push(broker_order_id.to_string());
        Ok(())
    }

    async fn list_pending_orders(&self) -> Result<Vec<BrokerOrder>, ExecutionError> {
        Ok(self.pending_orders.lock().clone())
    }

    async fn list_open_positions(&self) -> Result<Vec<BrokerPositionSide>, ExecutionError> {
        Ok(self.open_positions.lock().clone())
    }

    async fn transaction_stream(
        &self,
    ) -> Result<BoxStream<'static, Result<BrokerTransaction, ExecutionError>>, ExecutionError>
    {
        let batch = self
            .transaction_batches
            .lock()
            .pop_front()
            .ok_or_else(|| ExecutionError::Transport("no scripted stream batch".into()))?;
        Ok(futures::stream::iter(batch).boxed())
    }
}
