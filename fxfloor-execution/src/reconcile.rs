use crate::{
    account::BrokerAccount,
    client::BrokerClient,
    error::ExecutionError,
    order::{OrderRecord, OrderStatus},
    position::PositionRecord,
    repository::{OrderRepository, PositionRepository},
};
use chrono::Utc;
use fxfloor_instrument::{Direction, InstrumentSymbol};
use fxfloor_integration::event::{Event, EventSeverity, EventSink};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::{SmolStr, format_smolstr};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

/// Price / unit difference below which a matched pair is considered in sync.
const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct ReconcileOutcome {
    pub discrepancies_found: u32,
    pub records_updated: u32,
}

impl ReconcileOutcome {
    pub fn merge(self, other: ReconcileOutcome) -> Self {
        Self {
            discrepancies_found: self.discrepancies_found + other.discrepancies_found,
            records_updated: self.records_updated + other.records_updated,
        }
    }
}

/// Reconciles pending orders between the broker and local state.
///
/// Local-only pending orders are marked cancelled (the broker no longer knows
/// them); broker-only orders get a local row created.
pub struct OrderReconciler {
    account: BrokerAccount,
    client: Arc<dyn BrokerClient>,
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for OrderReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderReconciler")
            .field("account", &self.account.id)
            .finish()
    }
}

impl OrderReconciler {
    pub fn new(
        account: BrokerAccount,
        client: Arc<dyn BrokerClient>,
        orders: Arc<dyn OrderRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            account,
            client,
            orders,
            events,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ExecutionError> {
        let mut outcome = ReconcileOutcome::default();

        let broker_orders: HashMap<SmolStr, _> = self
            .client
            .list_pending_orders()
            .await?
            .into_iter()
            .map(|order| (order.id.clone(), order))
            .collect();
        let local_orders: HashMap<SmolStr, OrderRecord> = self
            .orders
            .pending(&self.account.id)?
            .into_iter()
            .map(|order| (order.broker_order_id.clone(), order))
            .collect();

        // Local pending orders the broker no longer reports: filled or cancelled
        // upstream - mark cancelled.
        for (order_id, local) in &local_orders {
            if broker_orders.contains_key(order_id) {
                continue;
            }
            outcome.discrepancies_found += 1;
            warn!(%order_id, "order pending locally but unknown to broker, marking cancelled");
            self.orders.set_status(
                &self.account.id,
                order_id,
                OrderStatus::Cancelled,
                None,
                None,
            )?;
            outcome.records_updated += 1;

            self.events.record(
                Event::trading(
                    "order_reconciliation",
                    EventSeverity::Warning,
                    format!("order {order_id} reconciled: marked as cancelled"),
                )
                .with_account(self.account.id.clone())
                .with_details(json!({
                    "order_id": order_id.as_str(),
                    "instrument": local.instrument.name(),
                    "action": "marked_cancelled",
                    "reason": "not_found_at_broker",
                })),
            );
        }

        // Broker orders with no local row: missed order creation.
        for (order_id, broker) in &broker_orders {
            if local_orders.contains_key(order_id) {
                continue;
            }
            outcome.discrepancies_found += 1;
            warn!(%order_id, "order pending at broker but missing locally, creating row");

            let direction = if broker.units >= Decimal::ZERO {
                Direction::Long
            } else {
                Direction::Short
            };
            self.orders.upsert(OrderRecord {
                account_id: self.account.id.clone(),
                broker_order_id: broker.id.clone(),
                instrument: broker.instrument.clone(),
                kind: broker.kind,
                direction,
                units: broker.units.abs().trunc().try_into().unwrap_or(0),
                price: broker.price,
                take_profit: None,
                stop_loss: None,
                status: OrderStatus::Pending,
                created_at: Utc::now(),
                filled_at: None,
                fill_price: None,
            })?;
            outcome.records_updated += 1;

            self.events.record(
                Event::trading(
                    "order_reconciliation",
                    EventSeverity::Warning,
                    format!("order {order_id} reconciled: created missing record"),
                )
                .with_account(self.account.id.clone())
                .with_details(json!({
                    "order_id": order_id.as_str(),
                    "instrument": broker.instrument.name(),
                    "action": "created_missing_record",
                })),
            );
        }

        info!(
            account = %self.account.id,
            discrepancies = outcome.discrepancies_found,
            updated = outcome.records_updated,
            "order reconciliation completed"
        );
        Ok(outcome)
    }
}

/// Reconciles open positions between the broker and local state, keyed by
/// `(instrument, direction)`.
pub struct PositionReconciler {
    account: BrokerAccount,
    client: Arc<dyn BrokerClient>,
    positions: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PositionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionReconciler")
            .field("account", &self.account.id)
            .finish()
    }
}

impl PositionReconciler {
    pub fn new(
        account: BrokerAccount,
        client: Arc<dyn BrokerClient>,
        positions: Arc<dyn PositionRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            account,
            client,
            positions,
            events,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ExecutionError> {
        let mut outcome = ReconcileOutcome::default();

        let broker_positions: HashMap<(InstrumentSymbol, Direction), _> = self
            .client
            .list_open_positions()
            .await?
            .into_iter()
            .map(|side| ((side.instrument.clone(), side.direction), side))
            .collect();
        let local_positions: HashMap<(InstrumentSymbol, Direction), PositionRecord> = self
            .positions
            .open(&self.account.id)?
            .into_iter()
            .map(|position| ((position.instrument.clone(), position.direction), position))
            .collect();

        // Local open positions the broker no longer reports: closed upstream -
        // close locally, moving unrealised P&L to realised.
        for (key, local) in &local_positions {
            if broker_positions.contains_key(key) {
                continue;
            }
            outcome.discrepancies_found += 1;
            warn!(
                position_id = %local.position_id,
                "position open locally but unknown to broker, closing"
            );

            let mut closed = local.clone();
            closed.realized_pnl = closed.unrealized_pnl;
            closed.unrealized_pnl = Decimal::ZERO;
            closed.closed_at = Some(Utc::now());
            self.positions.upsert(closed.clone())?;
            outcome.records_updated += 1;

            self.events.record(
                Event::trading(
                    "position_reconciliation",
                    EventSeverity::Warning,
                    format!("position {} reconciled: marked as closed", local.position_id),
                )
                .with_account(self.account.id.clone())
                .with_details(json!({
                    "position_id": local.position_id.as_str(),
                    "instrument": local.instrument.name(),
                    "action": "marked_closed",
                    "reason": "not_found_at_broker",
                    "realized_pnl": closed.realized_pnl.to_string(),
                })),
            );
        }

        for (key, broker) in &broker_positions {
            match local_positions.get(key) {
                // Broker-only: missed position creation.
                None => {
                    outcome.discrepancies_found += 1;
                    warn!(
                        instrument = %broker.instrument,
                        direction = %broker.direction,
                        "position open at broker but missing locally, creating row"
                    );

                    let position_id = format_smolstr!(
                        "reconciled_{}_{}",
                        broker.instrument.name(),
                        broker.direction
                    );
                    self.positions.upsert(PositionRecord {
                        account_id: self.account.id.clone(),
                        position_id: position_id.clone(),
                        strategy_type: None,
                        instrument: broker.instrument.clone(),
                        direction: broker.direction,
                        units: broker.units,
                        entry_price: broker.average_price,
                        current_price: broker.average_price,
                        unrealized_pnl: broker.unrealized_pnl,
                        realized_pnl: Decimal::ZERO,
                        opened_at: Utc::now(),
                        closed_at: None,
                    })?;
                    outcome.records_updated += 1;

                    self.events.record(
                        Event::trading(
                            "position_reconciliation",
                            EventSeverity::Warning,
                            format!("position {position_id} reconciled: created missing record"),
                        )
                        .with_account(self.account.id.clone())
                        .with_details(json!({
                            "position_id": position_id.as_str(),
                            "instrument": broker.instrument.name(),
                            "action": "created_missing_record",
                            "direction": broker.direction.to_string(),
                            "units": broker.units.to_string(),
                        })),
                    );
                }
                // Matched pair: update details that drifted beyond the epsilon.
                Some(local) => {
                    let units_differ = (local.units - broker.units).abs() > EPSILON;
                    let pnl_differ =
                        (local.unrealized_pnl - broker.unrealized_pnl).abs() > EPSILON;
                    if !units_differ && !pnl_differ {
                        continue;
                    }

                    outcome.discrepancies_found += 1;
                    let mut updated = local.clone();
                    updated.units = broker.units;
                    updated.unrealized_pnl = broker.unrealized_pnl;
                    updated.current_price = broker.average_price;
                    self.positions.upsert(updated)?;
                    outcome.records_updated += 1;

                    self.events.record(
                        Event::trading(
                            "position_reconciliation",
                            EventSeverity::Warning,
                            format!("position {} reconciled: updated details", local.position_id),
                        )
                        .with_account(self.account.id.clone())
                        .with_details(json!({
                            "position_id": local.position_id.as_str(),
                            "instrument": local.instrument.name(),
                            "action": "updated_details",
                            "units": broker.units.to_string(),
                            "unrealized_pnl": broker.unrealized_pnl.to_string(),
                        })),
                    );
                }
            }
        }

        info!(
            account = %self.account.id,
            discrepancies = outcome.discrepancies_found,
            updated = outcome.records_updated,
            "position reconciliation completed"
        );
        Ok(outcome)
    }
}

/// One full reconciliation pass (orders then positions) for an account.
pub async fn reconcile_account(
    account: BrokerAccount,
    client: Arc<dyn BrokerClient>,
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
) -> Result<ReconcileOutcome, ExecutionError> {
    let order_outcome = OrderReconciler::new(
        account.clone(),
        Arc::clone(&client),
        orders,
        Arc::clone(&events),
    )
    .reconcile()
    .await?;

    let position_outcome = PositionReconciler::new(account.clone(), client, positions, Arc::clone(&events))
        .reconcile()
        .await?;

    let outcome = order_outcome.merge(position_outcome);
    events.record(
        Event::system(
            "broker_sync_completed",
            EventSeverity::Info,
            format!("broker sync completed for account {}", account.id),
        )
        .with_account(account.id)
        .with_details(json!({
            "discrepancies_found": outcome.discrepancies_found,
            "records_updated": outcome.records_updated,
        })),
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{Environment, Jurisdiction},
        client::{BrokerOrder, BrokerPositionSide, mock::MockBrokerClient},
        order::OrderKind,
        repository::{InMemoryOrderRepository, InMemoryPositionRepository},
    };
    use fxfloor_integration::event::InMemoryEventSink;
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

    fn open_position(instrument: &str, direction: Direction) -> PositionRecord {
        PositionRecord {
            account_id: SmolStr::new("acct-1"),
            position_id: SmolStr::new("p1"),
            strategy_type: None,
            instrument: InstrumentSymbol::new(instrument),
            direction,
            units: dec!(2000),
            entry_price: dec!(149.50),
            current_price: dec!(149.40),
            unrealized_pnl: dec!(-2.0),
            realized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn test_reconciler_heals_missing_close_to_fixed_point() {
        let client = MockBrokerClient::new();
        let positions = InMemoryPositionRepository::new();
        let events = InMemoryEventSink::new();
        positions
            .upsert(open_position("USD_JPY", Direction::Long))
            .unwrap();

        let reconciler = PositionReconciler::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(positions.clone()),
            Arc::new(events.clone()),
        );

        // Broker reports no open positions: the local one must be closed.
        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.discrepancies_found, 1);

        let stored = positions.get("acct-1", "p1").unwrap().unwrap();
        assert!(!stored.is_open());
        assert_eq!(stored.realized_pnl, dec!(-2.0));
        assert_eq!(events.events_of_kind("position_reconciliation").len(), 1);

        // Second pass on the stable state reports zero discrepancies.
        let second = reconciler.reconcile().await.unwrap();
        assert_eq!(second, ReconcileOutcome::default());
    }

    #[tokio::test]
    async fn test_broker_only_position_is_created_then_stable() {
        let client = MockBrokerClient::new();
        client.set_open_positions(vec![BrokerPositionSide {
            instrument: InstrumentSymbol::new("EUR_USD"),
            direction: Direction::Short,
            units: dec!(3000),
            average_price: dec!(1.0850),
            unrealized_pnl: dec!(4.5),
        }]);
        let positions = InMemoryPositionRepository::new();
        let events = InMemoryEventSink::new();

        let reconciler = PositionReconciler::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(positions.clone()),
            Arc::new(events.clone()),
        );

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.discrepancies_found, 1);
        let open = positions.open("acct-1").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].units, dec!(3000));

        let second = reconciler.reconcile().await.unwrap();
        assert_eq!(second, ReconcileOutcome::default());
    }

    #[tokio::test]
    async fn test_matched_position_updates_beyond_epsilon() {
        let client = MockBrokerClient::new();
        client.set_open_positions(vec![BrokerPositionSide {
            instrument: InstrumentSymbol::new("USD_JPY"),
            direction: Direction::Long,
            units: dec!(2500),
            average_price: dec!(149.55),
            unrealized_pnl: dec!(10.0),
        }]);
        let positions = InMemoryPositionRepository::new();
        positions
            .upsert(open_position("USD_JPY", Direction::Long))
            .unwrap();
        let events = InMemoryEventSink::new();

        let reconciler = PositionReconciler::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(positions.clone()),
            Arc::new(events.clone()),
        );

        let outcome = reconciler.reconcile().await.unwrap();
        assert_eq!(outcome.discrepancies_found, 1);

        let stored = positions.get("acct-1", "p1").unwrap().unwrap();
        assert_eq!(stored.units, dec!(2500));
        assert_eq!(stored.unrealized_pnl, dec!(10.0));
        assert_eq!(stored.current_price, dec!(149.55));
    }

    #[tokio::test]
    async fn test_local_only_order_marked_cancelled() {
        let client = MockBrokerClient::new();
        let orders = InMemoryOrderRepository::new();
        let events = InMemoryEventSink::new();
        orders
            .upsert(OrderRecord {
                account_id: SmolStr::new("acct-1"),
                broker_order_id: SmolStr::new("11"),
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
            })
            .unwrap();

        let reconciler = OrderReconciler::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(orders.clone()),
            Arc::new(events.clone()),
        );
        let outcome = reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.discrepancies_found, 1);
        let stored = orders.get("acct-1", "11").unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(events.events_of_kind("order_reconciliation").len(), 1);
    }

    #[tokio::test]
    async fn test_broker_only_order_creates_local_row() {
        let client = MockBrokerClient::new();
        client.set_pending_orders(vec![BrokerOrder {
            id: SmolStr::new("12"),
            instrument: InstrumentSymbol::new("GBP_USD"),
            kind: OrderKind::Stop,
            units: dec!(-2000),
            price: Some(dec!(1.2600)),
        }]);
        let orders = InMemoryOrderRepository::new();
        let events = InMemoryEventSink::new();

        let reconciler = OrderReconciler::new(
            account(),
            Arc::new(client.clone()),
            Arc::new(orders.clone()),
            Arc::new(events.clone()),
        );
        let outcome = reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.records_updated, 1);
        let stored = orders.get("acct-1", "12").unwrap().unwrap();
        assert_eq!(stored.direction, Direction::Short);
        assert_eq!(stored.units, 2000);
        assert_eq!(stored.status, OrderStatus::Pending);
    }
}
