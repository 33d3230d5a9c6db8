use crate::{
    account::BrokerAccount,
    client::{BrokerClient, BrokerTransaction},
    error::ExecutionError,
    order::OrderStatus,
    position::PositionRecord,
    repository::{OrderRepository, PositionRepository},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use futures::StreamExt;
use fxfloor_data::reconnect::ReconnectionSchedule;
use fxfloor_instrument::Direction;
use fxfloor_integration::{
    channel::{Tx, UnboundedTx},
    event::{Event, EventSeverity, EventSink},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection status of a transaction stream, broadcast to the realtime layer.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[display("connected")]
    Connected,
    #[display("disconnected")]
    Disconnected,
    #[display("reconnecting")]
    Reconnecting,
    #[display("error")]
    Error,
}

/// One status frame for a specific account stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct StreamStatusUpdate {
    pub account_id: SmolStr,
    pub status: StreamStatus,
    pub message: String,
}

/// Consumes the broker's realtime transaction stream for one account and applies
/// order fills, cancellations, rejections and position changes to local state.
///
/// Stream failures reconnect with exponential backoff (`[1, 2, 4, 8, 16]` s, 5
/// attempts); a successful connection resets the counter. Status transitions are
/// broadcast to the realtime fan-out.
pub struct TransactionStreamer {
    account: BrokerAccount,
    client: Arc<dyn BrokerClient>,
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
    status_tx: Option<UnboundedTx<StreamStatusUpdate>>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for TransactionStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStreamer")
            .field("account", &self.account.id)
            .finish()
    }
}

impl TransactionStreamer {
    pub fn new(
        account: BrokerAccount,
        client: Arc<dyn BrokerClient>,
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PositionRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            account,
            client,
            orders,
            positions,
            events,
            status_tx: None,
            last_heartbeat: Mutex::new(None),
        }
    }

    /// Attach a status broadcast channel consumed by the realtime fan-out.
    pub fn with_status_tx(mut self, tx: UnboundedTx<StreamStatusUpdate>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Timestamp of the last broker heartbeat observed on the stream.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.lock()
    }

    /// Run the stream until reconnection attempts are exhausted.
    pub async fn run(&self, mut schedule: ReconnectionSchedule) -> Result<(), ExecutionError> {
        loop {
            match self.client.transaction_stream().await {
                Ok(mut stream) => {
                    schedule.reset();
                    info!(account = %self.account.id, "transaction stream connected");
                    self.events.record(
                        Event::system(
                            "transaction_stream_started",
                            EventSeverity::Info,
                            format!("transaction stream started for account {}", self.account.id),
                        )
                        .with_account(self.account.id.clone()),
                    );
                    self.broadcast(StreamStatus::Connected, "transaction stream connected");

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(transaction) => self.handle_transaction(transaction),
                            Err(error) => {
                                warn!(account = %self.account.id, %error, "transaction stream error");
                                break;
                            }
                        }
                    }

                    self.broadcast(StreamStatus::Reconnecting, "attempting to reconnect");
                }
                Err(error) => {
                    warn!(
                        account = %self.account.id,
                        %error,
                        attempt = schedule.attempts(),
                        "failed to open transaction stream"
                    );
                }
            }

            if !schedule.should_retry() {
                let message = format!(
                    "failed to reconnect after {} attempts",
                    schedule.max_attempts()
                );
                self.broadcast(StreamStatus::Error, &message);
                return Err(ExecutionError::Transport(message));
            }
            tokio::time::sleep(schedule.next_delay()).await;
            schedule.record_attempt();
        }
    }

    /// Apply one broker transaction to local order / position state.
    pub fn handle_transaction(&self, transaction: BrokerTransaction) {
        match transaction {
            BrokerTransaction::OrderFill {
                order_id,
                instrument,
                units,
                price,
                pl,
                time,
                ..
            } => {
                let direction = if units >= rust_decimal::Decimal::ZERO {
                    Direction::Long
                } else {
                    Direction::Short
                };

                match self.orders.set_status(
                    &self.account.id,
                    &order_id,
                    OrderStatus::Filled,
                    Some(time),
                    Some(price),
                ) {
                    Ok(()) => self.apply_fill_to_position(&order_id, &instrument, direction, units.abs(), price, time),
                    Err(_) => {
                        warn!(%order_id, "order not found for fill event");
                    }
                }

                self.events.record(
                    Event::trading(
                        "order_filled",
                        EventSeverity::Info,
                        format!("order filled: {instrument} {units} units @ {price}"),
                    )
                    .with_account(self.account.id.clone())
                    .with_details(json!({
                        "order_id": order_id.as_str(),
                        "instrument": instrument.name(),
                        "units": units.to_string(),
                        "price": price.to_string(),
                        "pl": pl.to_string(),
                    })),
                );
            }
            BrokerTransaction::OrderCancel { order_id, reason, .. } => {
                if self
                    .orders
                    .set_status(&self.account.id, &order_id, OrderStatus::Cancelled, None, None)
                    .is_err()
                {
                    warn!(%order_id, "order not found for cancel event");
                }
                self.events.record(
                    Event::trading(
                        "order_cancelled",
                        EventSeverity::Info,
                        format!("order cancelled: {order_id}"),
                    )
                    .with_account(self.account.id.clone())
                    .with_details(json!({"order_id": order_id.as_str(), "reason": reason})),
                );
            }
            BrokerTransaction::OrderReject { order_id, reason, .. } => {
                if self
                    .orders
                    .set_status(&self.account.id, &order_id, OrderStatus::Rejected, None, None)
                    .is_err()
                {
                    warn!(%order_id, "order not found for reject event");
                }
                self.events.record(
                    Event::trading(
                        "order_rejected",
                        EventSeverity::Warning,
                        format!("order rejected: {order_id} - {reason}"),
                    )
                    .with_account(self.account.id.clone())
                    .with_details(json!({"order_id": order_id.as_str(), "reject_reason": reason})),
                );
            }
            BrokerTransaction::TradeClose {
                trade_id,
                instrument,
                units,
                price,
                pl,
                time,
                ..
            } => {
                match self.positions.get(&self.account.id, &trade_id) {
                    Ok(Some(mut position)) if position.is_open() => {
                        position.realized_pnl = pl;
                        position.closed_at = Some(time);
                        position.current_price = price;
                        if let Err(error) = self.positions.upsert(position) {
                            warn!(%trade_id, %error, "failed to persist position close");
                        }
                        self.events.record(
                            Event::trading(
                                "position_closed",
                                EventSeverity::Info,
                                format!(
                                    "position closed: {instrument} {units} units @ {price}, P&L: {pl}"
                                ),
                            )
                            .with_account(self.account.id.clone())
                            .with_details(json!({
                                "trade_id": trade_id.as_str(),
                                "instrument": instrument.name(),
                                "units": units.to_string(),
                                "price": price.to_string(),
                                "pl": pl.to_string(),
                            })),
                        );
                    }
                    _ => warn!(%trade_id, "position not found for close event"),
                }
            }
            BrokerTransaction::TradeReduce {
                trade_id,
                instrument,
                units,
                price,
                ..
            } => {
                match self.positions.get(&self.account.id, &trade_id) {
                    Ok(Some(mut position)) if position.is_open() => {
                        position.units = units.abs();
                        position.current_price = price;
                        if let Err(error) = self.positions.upsert(position) {
                            warn!(%trade_id, %error, "failed to persist position reduce");
                        }
                        self.events.record(
                            Event::trading(
                                "position_reduced",
                                EventSeverity::Info,
                                format!("position reduced: {instrument} to {} units", units.abs()),
                            )
                            .with_account(self.account.id.clone())
                            .with_details(json!({
                                "trade_id": trade_id.as_str(),
                                "units": units.abs().to_string(),
                                "price": price.to_string(),
                            })),
                        );
                    }
                    _ => warn!(%trade_id, "position not found for reduce event"),
                }
            }
            BrokerTransaction::Heartbeat { time } => {
                debug!(account = %self.account.id, %time, "transaction stream heartbeat");
                *self.last_heartbeat.lock() = Some(time);
            }
        }
    }

    /// Create or grow the position matching an order fill. A new position adopts
    /// the order id as its position id.
    fn apply_fill_to_position(
        &self,
        order_id: &SmolStr,
        instrument: &fxfloor_instrument::InstrumentSymbol,
        direction: Direction,
        units: rust_decimal::Decimal,
        price: rust_decimal::Decimal,
        time: DateTime<Utc>,
    ) {
        let result = match self
            .positions
            .open_for(&self.account.id, instrument, direction)
        {
            Ok(Some(mut existing)) => {
                existing.units += units;
                existing.current_price = price;
                self.positions.upsert(existing)
            }
            Ok(None) => self.positions.upsert(PositionRecord {
                account_id: self.account.id.clone(),
                position_id: order_id.clone(),
                strategy_type: None,
                instrument: instrument.clone(),
                direction,
                units,
                entry_price: price,
                current_price: price,
                unrealized_pnl: rust_decimal::Decimal::ZERO,
                realized_pnl: rust_decimal::Decimal::ZERO,
                opened_at: time,
                closed_at: None,
            }),
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            warn!(%order_id, %error, "failed to upsert position on fill");
        }
    }

    fn broadcast(&self, status: StreamStatus, message: &str) {
        if let Some(tx) = &self.status_tx {
            let _ = tx.send(StreamStatusUpdate {
                account_id: self.account.id.clone(),
                status,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{Environment, Jurisdiction},
        client::mock::MockBrokerClient,
        order::{OrderKind, OrderRecord, TimeInForce},
        repository::{InMemoryOrderRepository, InMemoryPositionRepository},
    };
    use fxfloor_instrument::InstrumentSymbol;
    use fxfloor_integration::{channel::Channel, event::InMemoryEventSink};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn account() -> BrokerAccount {
        BrokerAccount {
            id: SmolStr::new("acct-1"),
            owner: SmolStr::new("user-1"),
            broker_account_id: SmolStr::new("001-001-1234567-001"),
            api_token: "secret".into(),
            environment: Environment::Practice,
            jurisdiction: Jurisdiction::Japan,
            currency: SmolStr::new("USD"),
            balance: dec!(10000),
            is_active: true,
        }
    }

    fn pending_order(id: &str) -> OrderRecord {
        OrderRecord {
            account_id: SmolStr::new("acct-1"),
            broker_order_id: SmolStr::new(id),
            instrument: InstrumentSymbol::new("EUR_USD"),
            kind: OrderKind::Limit,
            direction: Direction::Long,
            units: 1000,
            price: Some(dec!(1.0800)),
            take_profit: None,
            stop_loss: None,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            filled_at: None,
            fill_price: None,
        }
    }

    fn fill(order_id: &str, units: Decimal, price: Decimal) -> BrokerTransaction {
        BrokerTransaction::OrderFill {
            transaction_id: SmolStr::new("tx-1"),
            order_id: SmolStr::new(order_id),
            instrument: InstrumentSymbol::new("EUR_USD"),
            units,
            price,
            pl: Decimal::ZERO,
            time: Utc::now(),
        }
    }

    struct Harness {
        streamer: TransactionStreamer,
        client: MockBrokerClient,
        orders: InMemoryOrderRepository,
        positions: InMemoryPositionRepository,
        events: InMemoryEventSink,
    }

    fn harness() -> Harness {
        let client = MockBrokerClient::new();
        let orders = InMemoryOrderRepository::new();
        let positions = InMemoryPositionRepository::new();
        let events = InMemoryEventSink::new();
        let streamer = TransactionStreamer::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(orders.clone()),
            Arc::new(positions.clone()),
            Arc::new(events.clone()),
        );
        Harness {
            streamer,
            client,
            orders,
            positions,
            events,
        }
    }

    #[test]
    fn test_order_fill_creates_position_with_order_id() {
        let harness = harness();
        harness.orders.upsert(pending_order("41")).unwrap();

        harness.streamer.handle_transaction(fill("41", dec!(1000), dec!(1.0852)));

        let order = harness.orders.get("acct-1", "41").unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(dec!(1.0852)));

        let position = harness.positions.get("acct-1", "41").unwrap().unwrap();
        assert_eq!(position.units, dec!(1000));
        assert_eq!(position.direction, Direction::Long);
        assert_eq!(harness.events.events_of_kind("order_filled").len(), 1);
    }

    #[test]
    fn test_second_fill_grows_existing_position() {
        let harness = harness();
        harness.orders.upsert(pending_order("41")).unwrap();
        harness.orders.upsert(pending_order("42")).unwrap();

        harness.streamer.handle_transaction(fill("41", dec!(1000), dec!(1.0852)));
        harness.streamer.handle_transaction(fill("42", dec!(500), dec!(1.0860)));

        let position = harness.positions.get("acct-1", "41").unwrap().unwrap();
        assert_eq!(position.units, dec!(1500));
        assert_eq!(position.current_price, dec!(1.0860));
        // No second position was created.
        assert_eq!(harness.positions.open("acct-1").unwrap().len(), 1);
    }

    #[test]
    fn test_trade_close_realises_pnl() {
        let harness = harness();
        harness.orders.upsert(pending_order("41")).unwrap();
        harness.streamer.handle_transaction(fill("41", dec!(1000), dec!(1.0852)));

        harness.streamer.handle_transaction(BrokerTransaction::TradeClose {
            transaction_id: SmolStr::new("tx-2"),
            trade_id: SmolStr::new("41"),
            instrument: InstrumentSymbol::new("EUR_USD"),
            units: dec!(-1000),
            price: dec!(1.0872),
            pl: dec!(2.00),
            time: Utc::now(),
        });

        let position = harness.positions.get("acct-1", "41").unwrap().unwrap();
        assert!(!position.is_open());
        assert_eq!(position.realized_pnl, dec!(2.00));
        assert_eq!(harness.events.events_of_kind("position_closed").len(), 1);
    }

    #[test]
    fn test_trade_reduce_shrinks_units() {
        let harness = harness();
        harness.orders.upsert(pending_order("41")).unwrap();
        harness.streamer.handle_transaction(fill("41", dec!(1000), dec!(1.0852)));

        harness.streamer.handle_transaction(BrokerTransaction::TradeReduce {
            transaction_id: SmolStr::new("tx-2"),
            trade_id: SmolStr::new("41"),
            instrument: InstrumentSymbol::new("EUR_USD"),
            units: dec!(400),
            price: dec!(1.0860),
            pl: Decimal::ZERO,
            time: Utc::now(),
        });

        let position = harness.positions.get("acct-1", "41").unwrap().unwrap();
        assert_eq!(position.units, dec!(400));
        assert!(position.is_open());
    }

    #[test]
    fn test_heartbeat_updates_liveness() {
        let harness = harness();
        assert!(harness.streamer.last_heartbeat().is_none());
        harness
            .streamer
            .handle_transaction(BrokerTransaction::Heartbeat { time: Utc::now() });
        assert!(harness.streamer.last_heartbeat().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconnects_then_exhausts() {
        let harness = harness();
        let Channel { tx, mut rx } = Channel::<StreamStatusUpdate>::new();
        let streamer = TransactionStreamer::new(
            account(),
            Arc::new(harness.client.clone()),
            Arc::new(harness.orders.clone()),
            Arc::new(harness.positions.clone()),
            Arc::new(harness.events.clone()),
        )
        .with_status_tx(tx);

        harness.orders.upsert(pending_order("41")).unwrap();
        harness
            .client
            .push_transaction_batch(vec![Ok(fill("41", dec!(1000), dec!(1.0852)))]);

        let error = streamer
            .run(ReconnectionSchedule::new(vec![0], 2))
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::Transport(_)));

        let mut statuses = Vec::new();
        while let Ok(update) = rx.rx.try_recv() {
            statuses.push(update.status);
        }
        assert_eq!(statuses[0], StreamStatus::Connected);
        assert!(statuses.contains(&StreamStatus::Reconnecting));
        assert_eq!(*statuses.last().unwrap(), StreamStatus::Error);

        // The fill delivered before the disconnect was applied.
        assert!(harness.positions.get("acct-1", "41").unwrap().is_some());
    }
}
