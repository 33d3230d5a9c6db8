use crate::{
    account::BrokerAccount,
    client::{BrokerClient, BrokerOrderRequest, OrderOutcome},
    compliance::{ComplianceRules, OrderIntent},
    differentiation::PositionDifferentiation,
    error::ExecutionError,
    order::{OrderKind, OrderRecord, OrderStatus, TimeInForce},
    repository::{OrderRepository, PositionRepository},
};
use chrono::Utc;
use fxfloor_instrument::{Direction, InstrumentSymbol};
use fxfloor_integration::event::{Event, EventSeverity, EventSink};
use rust_decimal::Decimal;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Maximum submission attempts for transport-level failures.
const MAX_RETRIES: usize = 3;

/// Base delay between submission retries.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Submits orders to the broker for one account.
///
/// Every submission is compliance-gated, optionally unit-adjusted by the
/// position-differentiation policy, retried on transport errors (3 attempts, 500 ms
/// apart), persisted as an order row and audited.
pub struct OrderExecutor {
    account: BrokerAccount,
    client: Arc<dyn BrokerClient>,
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
    compliance: ComplianceRules,
    differentiation: PositionDifferentiation,
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("account", &self.account.id)
            .field("compliance", &self.compliance)
            .field("differentiation", &self.differentiation)
            .finish()
    }
}

impl OrderExecutor {
    pub fn new(
        account: BrokerAccount,
        client: Arc<dyn BrokerClient>,
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PositionRepository>,
        events: Arc<dyn EventSink>,
        differentiation: PositionDifferentiation,
    ) -> Self {
        let compliance = ComplianceRules::for_jurisdiction(account.jurisdiction);
        Self {
            account,
            client,
            orders,
            positions,
            events,
            compliance,
            differentiation,
        }
    }

    /// Submit a market order (fill-or-kill). Positive units open long, negative
    /// short.
    pub async fn submit_market_order(
        &self,
        instrument: InstrumentSymbol,
        units: i64,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutionError> {
        self.submit(
            instrument,
            units,
            OrderKind::Market,
            TimeInForce::FillOrKill,
            None,
            take_profit,
            stop_loss,
        )
        .await
    }

    /// Submit a limit order (good-until-cancelled).
    pub async fn submit_limit_order(
        &self,
        instrument: InstrumentSymbol,
        units: i64,
        price: Decimal,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutionError> {
        self.submit(
            instrument,
            units,
            OrderKind::Limit,
            TimeInForce::GoodUntilCancelled,
            Some(price),
            take_profit,
            stop_loss,
        )
        .await
    }

    /// Submit a stop order (good-until-cancelled).
    pub async fn submit_stop_order(
        &self,
        instrument: InstrumentSymbol,
        units: i64,
        price: Decimal,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutionError> {
        self.submit(
            instrument,
            units,
            OrderKind::Stop,
            TimeInForce::GoodUntilCancelled,
            Some(price),
            take_profit,
            stop_loss,
        )
        .await
    }

    /// Submit an OCO pair as two independent resting orders (LIMIT + STOP).
    ///
    /// The legs are not linked on the exchange side; cancellation of the surviving
    /// leg on fill is the transaction stream consumer's job.
    pub async fn submit_oco_order(
        &self,
        instrument: InstrumentSymbol,
        units: i64,
        limit_price: Decimal,
        stop_price: Decimal,
    ) -> Result<(OrderRecord, OrderRecord), ExecutionError> {
        self.compliance.validate(&OrderIntent {
            instrument: instrument.clone(),
            kind: OrderKind::Oco,
            units,
            price: Some(limit_price),
        })?;

        let limit = self
            .submit_limit_order(instrument.clone(), units, limit_price, None, None)
            .await?;
        let stop = self
            .submit_stop_order(instrument, units, stop_price, None, None)
            .await?;
        Ok((limit, stop))
    }

    /// Cancel a pending order on broker acknowledgement.
    pub async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError> {
        self.client.cancel_order(broker_order_id).await?;

        self.orders.set_status(
            &self.account.id,
            broker_order_id,
            OrderStatus::Cancelled,
            None,
            None,
        )?;

        self.events.record(
            Event::trading(
                "order_cancelled",
                EventSeverity::Info,
                format!("order {broker_order_id} cancelled"),
            )
            .with_account(self.account.id.clone())
            .with_details(json!({"broker_order_id": broker_order_id})),
        );
        Ok(())
    }

    async fn submit(
        &self,
        instrument: InstrumentSymbol,
        units: i64,
        kind: OrderKind,
        time_in_force: TimeInForce,
        price: Option<Decimal>,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutionError> {
        let direction = if units >= 0 {
            Direction::Long
        } else {
            Direction::Short
        };

        let adjusted_units = self.apply_differentiation(&instrument, units)?;

        let intent = OrderIntent {
            instrument: instrument.clone(),
            kind,
            units: adjusted_units,
            price,
        };
        if let Err(violation) = self.compliance.validate(&intent) {
            self.events.record(
                Event::security(
                    "compliance_violation",
                    EventSeverity::Warning,
                    format!("order rejected: {violation}"),
                )
                .with_account(self.account.id.clone())
                .with_details(json!({
                    "instrument": instrument.name(),
                    "units": adjusted_units,
                    "order_type": kind.to_string(),
                    "jurisdiction": self.account.jurisdiction.to_string(),
                })),
            );
            return Err(violation.into());
        }

        let request = BrokerOrderRequest {
            instrument: instrument.clone(),
            units: adjusted_units,
            kind,
            time_in_force,
            price,
            take_profit,
            stop_loss,
        };

        info!(
            account = %self.account.id,
            instrument = %instrument,
            %direction,
            units = adjusted_units.abs(),
            %kind,
            "submitting order"
        );

        let outcome = match self.execute_with_retry(&request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let (event_kind, description) = match &error {
                    ExecutionError::BrokerReject { reason } => {
                        ("order_rejected", format!("order rejected: {reason}"))
                    }
                    other => ("order_failed", format!("order submission failed: {other}")),
                };
                self.events.record(
                    Event::trading(event_kind, EventSeverity::Error, description)
                        .with_account(self.account.id.clone())
                        .with_details(json!({
                            "instrument": instrument.name(),
                            "order_type": kind.to_string(),
                            "direction": direction.to_string(),
                            "units": adjusted_units.abs(),
                        })),
                );
                return Err(error);
            }
        };

        let now = Utc::now();
        let (status, filled_at, fill_price) = match &outcome {
            OrderOutcome::Filled { price, .. } => {
                (OrderStatus::Filled, Some(now), Some(*price))
            }
            OrderOutcome::Created { .. } => (OrderStatus::Pending, None, None),
        };

        let record = OrderRecord {
            account_id: self.account.id.clone(),
            broker_order_id: outcome.broker_order_id().clone(),
            instrument: instrument.clone(),
            kind,
            direction,
            units: adjusted_units.abs(),
            price,
            take_profit,
            stop_loss,
            status,
            created_at: now,
            filled_at,
            fill_price,
        };
        self.orders.upsert(record.clone())?;

        self.events.record(
            Event::trading(
                "order_submitted",
                EventSeverity::Info,
                format!(
                    "{kind} order submitted: {direction} {} {instrument}",
                    adjusted_units.abs()
                ),
            )
            .with_account(self.account.id.clone())
            .with_details(json!({
                "broker_order_id": record.broker_order_id.as_str(),
                "instrument": instrument.name(),
                "order_type": kind.to_string(),
                "direction": direction.to_string(),
                "units": adjusted_units.abs(),
                "price": price.map(|price| price.to_string()),
                "status": status.to_string(),
                "fill_price": fill_price.map(|price| price.to_string()),
            })),
        );

        Ok(record)
    }

    /// Rewrite units through the position-differentiation policy, preserving sign.
    fn apply_differentiation(
        &self,
        instrument: &InstrumentSymbol,
        units: i64,
    ) -> Result<i64, ExecutionError> {
        if !self.differentiation.enabled {
            return Ok(units);
        }

        let existing_sizes: Vec<i64> = self
            .positions
            .open(&self.account.id)?
            .into_iter()
            .filter(|position| position.instrument == *instrument)
            .filter_map(|position| position.units.trunc().try_into().ok())
            .collect();

        let (adjusted, was_adjusted) =
            self.differentiation
                .adjust_units(&existing_sizes, units.abs(), Some(1), None);

        if was_adjusted {
            info!(
                instrument = %instrument,
                from = units.abs(),
                to = adjusted,
                "position differentiation applied"
            );
            self.events.record(
                Event::trading(
                    "position_differentiation_applied",
                    EventSeverity::Info,
                    format!(
                        "order units adjusted for position differentiation: {} -> {adjusted}",
                        units.abs()
                    ),
                )
                .with_account(self.account.id.clone())
                .with_details(json!({
                    "instrument": instrument.name(),
                    "original_units": units.abs(),
                    "adjusted_units": adjusted,
                    "increment": self.differentiation.increment,
                })),
            );
        }

        Ok(if units >= 0 { adjusted } else { -adjusted })
    }

    async fn execute_with_retry(
        &self,
        request: &BrokerOrderRequest,
    ) -> Result<OrderOutcome, ExecutionError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            match self.client.create_order(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(ExecutionError::Transport(error)) => {
                    warn!(attempt, %error, "order submission attempt failed");
                    last_error = error;
                }
                // Broker rejections and compliance failures are never retried.
                Err(error) => return Err(error),
            }

            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(ExecutionError::RetriesExhausted {
            attempts: MAX_RETRIES,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{Environment, Jurisdiction},
        client::mock::MockBrokerClient,
        position::PositionRecord,
        repository::{InMemoryOrderRepository, InMemoryPositionRepository},
    };
    use fxfloor_integration::event::InMemoryEventSink;
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    struct Harness {
        executor: OrderExecutor,
        client: MockBrokerClient,
        orders: InMemoryOrderRepository,
        positions: InMemoryPositionRepository,
        events: InMemoryEventSink,
    }

    fn account(jurisdiction: Jurisdiction) -> BrokerAccount {
        BrokerAccount {
            id: SmolStr::new("acct-1"),
            owner: SmolStr::new("user-1"),
            broker_account_id: SmolStr::new("001-001-1234567-001"),
            api_token: "secret".into(),
            environment: Environment::Practice,
            jurisdiction,
            currency: SmolStr::new("USD"),
            balance: dec!(10000),
            is_active: true,
        }
    }

    fn harness(jurisdiction: Jurisdiction, differentiation: PositionDifferentiation) -> Harness {
        let client = MockBrokerClient::new();
        let orders = InMemoryOrderRepository::new();
        let positions = InMemoryPositionRepository::new();
        let events = InMemoryEventSink::new();
        let executor = OrderExecutor::new(
            account(jurisdiction),
            Arc::new(client.clone()),
            Arc::new(orders.clone()),
            Arc::new(positions.clone()),
            Arc::new(events.clone()),
            differentiation,
        );
        Harness {
            executor,
            client,
            orders,
            positions,
            events,
        }
    }

    fn symbol() -> InstrumentSymbol {
        InstrumentSymbol::new("EUR_USD")
    }

    #[tokio::test]
    async fn test_market_order_fill_is_stored_atomically() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        harness.client.push_order_outcome(Ok(OrderOutcome::Filled {
            broker_order_id: SmolStr::new("77"),
            price: dec!(1.0852),
        }));

        let record = harness
            .executor
            .submit_market_order(symbol(), 1000, None, None)
            .await
            .unwrap();

        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.fill_price, Some(dec!(1.0852)));
        let stored = harness.orders.get("acct-1", "77").unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(harness.events.events_of_kind("order_submitted").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        harness
            .client
            .push_order_outcome(Err(ExecutionError::Transport("connection reset".into())));
        harness.client.push_order_outcome(Ok(OrderOutcome::Created {
            broker_order_id: SmolStr::new("78"),
        }));

        let record = harness
            .executor
            .submit_limit_order(symbol(), 1000, dec!(1.0800), None, None)
            .await
            .unwrap();

        assert_eq!(record.status, OrderStatus::Pending);
        assert_eq!(harness.client.submitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_after_three_attempts() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        for _ in 0..3 {
            harness
                .client
                .push_order_outcome(Err(ExecutionError::Transport("timeout".into())));
        }

        let error = harness
            .executor
            .submit_market_order(symbol(), 1000, None, None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ExecutionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(harness.client.submitted().len(), 3);
        assert_eq!(harness.events.events_of_kind("order_failed").len(), 1);
    }

    #[tokio::test]
    async fn test_broker_reject_is_not_retried() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        harness.client.push_order_outcome(Err(ExecutionError::BrokerReject {
            reason: "INSUFFICIENT_MARGIN".into(),
        }));

        let error = harness
            .executor
            .submit_market_order(symbol(), 1000, None, None)
            .await
            .unwrap_err();

        assert!(matches!(error, ExecutionError::BrokerReject { .. }));
        assert_eq!(harness.client.submitted().len(), 1);
        assert_eq!(harness.events.events_of_kind("order_rejected").len(), 1);
    }

    #[tokio::test]
    async fn test_compliance_violation_blocks_submission() {
        let harness = harness(Jurisdiction::UnitedStates, PositionDifferentiation::default());

        let error = harness
            .executor
            .submit_oco_order(symbol(), 1000, dec!(1.0800), dec!(1.0900))
            .await
            .unwrap_err();

        assert!(matches!(error, ExecutionError::Compliance(_)));
        assert!(harness.client.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_differentiation_rewrites_colliding_units() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::enabled(1));
        harness
            .positions
            .upsert(PositionRecord {
                account_id: SmolStr::new("acct-1"),
                position_id: SmolStr::new("p1"),
                strategy_type: None,
                instrument: symbol(),
                direction: Direction::Long,
                units: dec!(1000),
                entry_price: dec!(1.0800),
                current_price: dec!(1.0800),
                unrealized_pnl: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                opened_at: Utc::now(),
                closed_at: None,
            })
            .unwrap();

        harness
            .executor
            .submit_market_order(symbol(), -1000, None, None)
            .await
            .unwrap();

        let submitted = harness.client.submitted();
        assert_eq!(submitted[0].units, -1001);
        assert_eq!(
            harness
                .events
                .events_of_kind("position_differentiation_applied")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_oco_legs_are_independent_orders() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        harness.client.push_order_outcome(Ok(OrderOutcome::Created {
            broker_order_id: SmolStr::new("limit-1"),
        }));
        harness.client.push_order_outcome(Ok(OrderOutcome::Created {
            broker_order_id: SmolStr::new("stop-1"),
        }));

        let (limit, stop) = harness
            .executor
            .submit_oco_order(symbol(), 1000, dec!(1.0800), dec!(1.0900))
            .await
            .unwrap();

        assert_eq!(limit.kind, OrderKind::Limit);
        assert_eq!(stop.kind, OrderKind::Stop);
        assert_eq!(harness.client.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_order_marks_row_cancelled() {
        let harness = harness(Jurisdiction::Japan, PositionDifferentiation::default());
        harness.client.push_order_outcome(Ok(OrderOutcome::Created {
            broker_order_id: SmolStr::new("9"),
        }));
        harness
            .executor
            .submit_limit_order(symbol(), 1000, dec!(1.0800), None, None)
            .await
            .unwrap();

        harness.executor.cancel_order("9").await.unwrap();

        let stored = harness.orders.get("acct-1", "9").unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(harness.client.cancelled(), vec!["9".to_string()]);
    }
}
