use crate::{
    backtest::{BacktestConfig, BacktestEngine, BacktestReport, BacktestRunStatus},
    config::SystemConfig,
    error::FxFloorError,
    lock::TaskLockManager,
    task::{
        Task, TaskExecutionRecord, TaskId, TaskKind, TaskStatus, TaskType,
        repository::{
            TaskExecutionRepository, TaskLogRepository, TaskMetricRepository, TaskRepository,
        },
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use fxfloor_data::{
    historical::{HistoricalTicks, TickDataSource},
    live::{PricingFeed, init_live_tick_stream},
    reconnect::Event as StreamEvent,
};
use fxfloor_execution::{executor::OrderExecutor, repository::PositionRepository};
use fxfloor_instrument::{Direction, InstrumentSymbol};
use fxfloor_integration::event::{Event, EventSeverity, EventSink};
use fxfloor_strategy::{TradingMode, event::StrategyEvent, registry::StrategyRegistry};
use serde_json::json;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Ticks between cooperative cancellation polls during a backtest.
const BACKTEST_CANCEL_POLL_TICKS: usize = 250;

/// Target number of equity samples retained per backtest.
const EQUITY_TARGET_SAMPLES: usize = 1_000;

/// Consumer of strategy events during a live trading run.
///
/// Implementations realise the side effects - order submission, persistence,
/// fan-out. The strategy itself never performs I/O.
#[async_trait]
pub trait StrategyEventHandler: Send + Sync {
    async fn on_event(&self, event: &StrategyEvent);

    /// Close all open positions; invoked on stop for tasks with `sell_on_stop`.
    async fn close_all(&self);
}

/// Routes strategy events to broker orders for one account.
///
/// Open events become market orders in the event direction; take-profits and
/// close-everything events become opposing market orders.
pub struct OrderRoutingHandler {
    executor: Arc<OrderExecutor>,
    positions: Arc<dyn PositionRepository>,
    account_id: SmolStr,
    instrument: InstrumentSymbol,
}

impl std::fmt::Debug for OrderRoutingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRoutingHandler")
            .field("account_id", &self.account_id)
            .field("instrument", &self.instrument)
            .finish()
    }
}

impl OrderRoutingHandler {
    pub fn new(
        executor: Arc<OrderExecutor>,
        positions: Arc<dyn PositionRepository>,
        account_id: SmolStr,
        instrument: InstrumentSymbol,
    ) -> Self {
        Self {
            executor,
            positions,
            account_id,
            instrument,
        }
    }

    fn signed_units(direction: Direction, units: i64) -> i64 {
        match direction {
            Direction::Long => units,
            Direction::Short => -units,
        }
    }

    async fn submit(&self, direction: Direction, units: i64) {
        if let Err(error) = self
            .executor
            .submit_market_order(self.instrument.clone(), Self::signed_units(direction, units), None, None)
            .await
        {
            // Broker rejections are recorded and the strategy continues.
            warn!(%error, "market order submission failed");
        }
    }
}

#[async_trait]
impl StrategyEventHandler for OrderRoutingHandler {
    async fn on_event(&self, event: &StrategyEvent) {
        match event {
            StrategyEvent::InitialEntry(open) => self.submit(open.direction, open.units).await,
            StrategyEvent::Retracement(open) => self.submit(open.direction, open.units).await,
            StrategyEvent::TakeProfit(close) => {
                self.submit(close.direction.opposite(), close.units).await
            }
            StrategyEvent::VolatilityHedgeNeutralize(hedge) => {
                for instruction in &hedge.hedges {
                    self.submit(instruction.direction, instruction.units).await;
                }
            }
            StrategyEvent::VolatilityLock(lock) if lock.reason.starts_with("[CLOSE]") => {
                self.close_all().await
            }
            StrategyEvent::MarginProtection(protection) => {
                // Margin cuts close oldest exposure; without per-entry detail on
                // the broker side, reduce by the closed unit total.
                if protection.units_closed > 0 {
                    let direction = self
                        .positions
                        .open_for(&self.account_id, &self.instrument, Direction::Long)
                        .ok()
                        .flatten()
                        .map(|_| Direction::Long)
                        .unwrap_or(Direction::Short);
                    self.submit(direction.opposite(), protection.units_closed).await;
                }
            }
            _ => {}
        }
    }

    async fn close_all(&self) {
        let Ok(open) = self.positions.open(&self.account_id) else {
            return;
        };
        for position in open {
            if position.instrument != self.instrument {
                continue;
            }
            let units: i64 = position.units.trunc().try_into().unwrap_or(0);
            if units > 0 {
                self.submit(position.direction.opposite(), units).await;
            }
        }
    }
}

/// No-op [`StrategyEventHandler`] for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct NoopEventHandler;

#[async_trait]
impl StrategyEventHandler for NoopEventHandler {
    async fn on_event(&self, _: &StrategyEvent) {}

    async fn close_all(&self) {}
}

/// Drives task lifecycles: validation, locking, execution records, strategy runs,
/// metrics and cleanup.
///
/// A worker owns one task at a time for the duration of its run; the lock store is
/// the only cross-process coordination primitive.
pub struct TaskExecutor {
    config: SystemConfig,
    registry: Arc<StrategyRegistry>,
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn TaskExecutionRepository>,
    logs: Arc<dyn TaskLogRepository>,
    metrics: Arc<dyn TaskMetricRepository>,
    locks: TaskLockManager,
    events: Arc<dyn EventSink>,
    worker_id: SmolStr,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl TaskExecutor {
    pub fn new(
        config: SystemConfig,
        registry: Arc<StrategyRegistry>,
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn TaskExecutionRepository>,
        logs: Arc<dyn TaskLogRepository>,
        metrics: Arc<dyn TaskMetricRepository>,
        locks: TaskLockManager,
        events: Arc<dyn EventSink>,
        worker_id: impl Into<SmolStr>,
    ) -> Self {
        Self {
            config,
            registry,
            tasks,
            executions,
            logs,
            metrics,
            locks,
            events,
            worker_id: worker_id.into(),
        }
    }

    pub fn locks(&self) -> &TaskLockManager {
        &self.locks
    }

    fn load_task(&self, task_id: TaskId) -> Result<Task, FxFloorError> {
        self.tasks
            .get(task_id)?
            .ok_or_else(|| FxFloorError::validation(format!("task {task_id} does not exist")))
    }

    /// Validate the task's strategy parameters against the declared schema, plus
    /// variant-specific constraints. Fails fast before any state mutates.
    fn validate(&self, task: &Task) -> Result<(), FxFloorError> {
        self.registry
            .validate_params(&task.config.strategy_type, &task.config.parameters)?;
        if let TaskKind::Backtest(spec) = &task.kind {
            spec.validate(Utc::now())?;
        }
        Ok(())
    }

    /// Start a task: validate, enforce account exclusivity, acquire the lock and
    /// allocate the next execution. Returns the new execution record.
    pub fn submit(&self, task_id: TaskId) -> Result<TaskExecutionRecord, FxFloorError> {
        let task = self.load_task(task_id)?;
        let now = Utc::now();

        let mut updated = task.clone();
        updated.submit(now)?;
        self.validate(&task)?;

        // At most one running trading task per brokerage account.
        if let TaskKind::Trading(spec) = &task.kind
            && let Some(other) = self
                .tasks
                .running_trading_task_on_account(&spec.account_id, task.id)?
        {
            warn!(%task_id, %other, "another task is already running on this account");
            return Err(FxFloorError::AlreadyRunning);
        }

        let task_type = task.task_type();
        if !self.locks.acquire(task_type, task_id, None, &self.worker_id)? {
            return Err(FxFloorError::AlreadyRunning);
        }

        let execution = match self.executions.begin(task_type, task_id, now) {
            Ok(execution) => execution,
            Err(error) => {
                self.locks.release(task_type, task_id)?;
                return Err(error);
            }
        };

        updated.run_token = Some(execution.id);
        self.tasks.upsert(updated)?;

        self.logs.append(
            execution.id,
            EventSeverity::Info,
            format!("execution #{} started", execution.execution_number),
            json!({"worker_id": self.worker_id.as_str()}),
        );
        self.events.record(
            Event::trading(
                "task_started",
                EventSeverity::Info,
                format!("{task_type} task '{}' started", task.name),
            )
            .with_actor(task.owner.clone())
            .with_details(json!({
                "task_id": task_id.to_string(),
                "execution_number": execution.execution_number,
            })),
        );

        info!(%task_type, %task_id, execution = execution.execution_number, "task started");
        Ok(execution)
    }

    /// Execute a backtest task end to end: load ticks, drive the strategy, record
    /// metrics, release the lock.
    pub async fn execute_backtest(
        &self,
        task_id: TaskId,
        data_source: &dyn TickDataSource,
    ) -> Result<BacktestReport, FxFloorError> {
        let execution = self.submit(task_id)?;
        let task = self.load_task(task_id)?;
        let TaskKind::Backtest(spec) = task.kind.clone() else {
            self.fail_run(&task, execution.clone(), "not a backtest task")?;
            return Err(FxFloorError::validation("not a backtest task"));
        };

        let result = self
            .drive_backtest(&task, &execution, &spec, data_source)
            .await;

        match result {
            Ok(report) => {
                self.finish_backtest(task, execution, &report)?;
                Ok(report)
            }
            Err(error) => {
                self.fail_run(&task, execution, &error.to_string())?;
                Err(error)
            }
        }
    }

    async fn drive_backtest(
        &self,
        task: &Task,
        execution: &TaskExecutionRecord,
        spec: &crate::task::BacktestSpec,
        data_source: &dyn TickDataSource,
    ) -> Result<BacktestReport, FxFloorError> {
        let ticks = HistoricalTicks::load(
            data_source,
            spec.instrument.clone(),
            spec.start_time,
            spec.end_time,
        )
        .await?
        .downsample(self.config.backtest_memory_limit);

        let strategy = self.registry.build(
            &task.config.strategy_type,
            &task.config.parameters,
            TradingMode::Hedging,
        )?;

        let engine = BacktestEngine::new(
            strategy,
            BacktestConfig {
                strategy_type: task.config.strategy_type.clone(),
                parameters: task.config.parameters.clone(),
                instrument: spec.instrument.clone(),
                initial_balance: spec.initial_balance,
                commission_per_trade: spec.commission_per_trade,
                equity_sample_interval: (ticks.len() / EQUITY_TARGET_SAMPLES).max(1),
            },
        );

        let locks = self.locks.clone();
        let task_type = task.task_type();
        let task_id = task.id;
        let mut polled = 0usize;
        let cancel = move || {
            polled += 1;
            if polled % BACKTEST_CANCEL_POLL_TICKS != 0 {
                return false;
            }
            // Heartbeat piggybacks on the cancellation poll.
            let _ = locks.heartbeat(task_type, task_id);
            locks.check_cancel(task_type, task_id).unwrap_or(false)
        };

        let executions = Arc::clone(&self.executions);
        let mut progress_record = execution.clone();
        let on_progress = move |progress: u8| {
            progress_record.progress = progress;
            let _ = executions.update(progress_record.clone());
        };

        engine.run(ticks, cancel, on_progress)
    }

    fn finish_backtest(
        &self,
        mut task: Task,
        mut execution: TaskExecutionRecord,
        report: &BacktestReport,
    ) -> Result<(), FxFloorError> {
        let now = Utc::now();
        let task_type = task.task_type();

        let metrics_value = serde_json::to_value(&report.metrics).unwrap_or_default();
        self.metrics.append(
            execution.id,
            now,
            json!({
                "performance": metrics_value,
                "final_balance": report.final_balance.to_string(),
                "trades": report.trade_log.len(),
                "ticks_processed": report.ticks_processed,
            }),
        );

        let final_status = match report.status {
            BacktestRunStatus::Completed => {
                task.complete(now)?;
                TaskStatus::Completed
            }
            BacktestRunStatus::Stopped => {
                task.stop(now)?;
                TaskStatus::Stopped
            }
        };

        // The progress callback may have advanced the stored row past this
        // snapshot; finalise from the latest state.
        if let Some(latest) = self.executions.latest(task_type, execution.task_id)? {
            execution.progress = latest.progress;
        }
        execution.status = final_status;
        execution.completed_at = Some(now);
        if final_status == TaskStatus::Completed {
            execution.progress = 100;
        }
        self.executions.update(execution.clone())?;

        task.result_data = Some(serde_json::to_value(&report.metrics).unwrap_or_default());
        task.strategy_state = report.final_state.clone();
        task.run_token = None;
        self.tasks.upsert(task)?;

        self.logs.append(
            execution.id,
            EventSeverity::Info,
            format!(
                "execution #{} finished with status {final_status}",
                execution.execution_number
            ),
            json!({"trades": report.trade_log.len()}),
        );

        self.locks.release(task_type, execution.task_id)?;
        Ok(())
    }

    fn fail_run(
        &self,
        task: &Task,
        mut execution: TaskExecutionRecord,
        message: &str,
    ) -> Result<(), FxFloorError> {
        let now = Utc::now();
        error!(task_id = %task.id, message, "task run failed");

        execution.status = TaskStatus::Failed;
        execution.completed_at = Some(now);
        execution.error_message = Some(message.to_string());
        self.executions.update(execution.clone())?;

        let mut failed = task.clone();
        failed.fail(message, now)?;
        failed.run_token = None;
        self.tasks.upsert(failed)?;

        self.logs.append(
            execution.id,
            EventSeverity::Error,
            format!("execution #{} failed: {message}", execution.execution_number),
            serde_json::Value::Null,
        );

        self.locks.release(task.task_type(), task.id)?;
        Ok(())
    }

    /// Execute a trading task: subscribe to the live tick source and hand every
    /// tick to the strategy, realising events through the handler. Runs until the
    /// stream ends, the cancellation flag is observed, or the strategy requests a
    /// stop.
    pub async fn execute_trading(
        &self,
        task_id: TaskId,
        feed: Arc<dyn PricingFeed>,
        handler: Arc<dyn StrategyEventHandler>,
    ) -> Result<(), FxFloorError> {
        let execution = self.submit(task_id)?;
        let mut task = self.load_task(task_id)?;
        let TaskKind::Trading(spec) = task.kind.clone() else {
            self.fail_run(&task, execution.clone(), "not a trading task")?;
            return Err(FxFloorError::validation("not a trading task"));
        };

        let strategy = match self.registry.build(
            &task.config.strategy_type,
            &task.config.parameters,
            TradingMode::Hedging,
        ) {
            Ok(strategy) => strategy,
            Err(error) => {
                self.fail_run(&task, execution, &error.to_string())?;
                return Err(error.into());
            }
        };

        let mut stream = init_live_tick_stream(feed, self.config.stream_schedule()).await;
        let mut state = task.strategy_state.clone();
        // Seed the balance estimate for NAV / margin calculations.
        if state.is_null() {
            state = json!({"account_balance": "0"});
        }
        let mut last_heartbeat = std::time::Instant::now();
        let mut cancelled = false;
        let mut stop_reason: Option<String> = None;

        while let Some(event) = stream.next().await {
            let tick = match event {
                StreamEvent::Reconnecting(instrument) => {
                    info!(%instrument, "live tick stream reconnecting");
                    continue;
                }
                StreamEvent::Item(tick) => tick,
            };

            // Cancellation is cooperative, observed between ticks.
            if self.locks.check_cancel(task.task_type(), task_id)? {
                cancelled = true;
                break;
            }
            if last_heartbeat.elapsed() >= self.config.heartbeat_interval() {
                self.locks.heartbeat(task.task_type(), task_id)?;
                last_heartbeat = std::time::Instant::now();
            }

            let result = match strategy.on_tick(&tick, state.clone()) {
                Ok(result) => result,
                Err(error) => {
                    self.fail_run(&task, execution.clone(), &error.to_string())?;
                    return Err(error.into());
                }
            };
            state = result.state;

            for event in &result.events {
                self.logs.append(
                    execution.id,
                    EventSeverity::Info,
                    format!("strategy event: {}", event.kind()),
                    serde_json::to_value(event).unwrap_or_default(),
                );
                handler.on_event(event).await;
            }

            // Checkpoint the strategy state back to the task row on every tick.
            task.strategy_state = state.clone();
            self.tasks.upsert(task.clone())?;

            if result.should_stop {
                stop_reason = result.stop_reason.clone();
                cancelled = true;
                break;
            }
        }

        if spec.sell_on_stop && cancelled {
            handler.close_all().await;
        }

        let now = Utc::now();
        let mut final_execution = execution;
        final_execution.status = TaskStatus::Stopped;
        final_execution.completed_at = Some(now);
        final_execution.error_message = stop_reason.clone();
        self.executions.update(final_execution)?;

        task.stop(now)?;
        task.run_token = None;
        self.tasks.upsert(task.clone())?;
        self.locks.release(task.task_type(), task_id)?;

        info!(%task_id, ?stop_reason, "trading run stopped");
        Ok(())
    }

    /// Append a transition line to the latest execution's log.
    fn log_transition(&self, task: &Task, message: String) -> Result<(), FxFloorError> {
        if let Some(execution) = self.executions.latest(task.task_type(), task.id)? {
            self.logs.append(
                execution.id,
                EventSeverity::Info,
                message,
                json!({"status": task.status.to_string()}),
            );
        }
        Ok(())
    }

    /// Request cooperative cancellation of a running task.
    pub fn request_stop(&self, task_id: TaskId) -> Result<(), FxFloorError> {
        let task = self.load_task(task_id)?;
        if !matches!(task.status, TaskStatus::Running | TaskStatus::Paused) {
            return Err(FxFloorError::validation(format!(
                "cannot stop task in status '{}'",
                task.status
            )));
        }
        self.locks.set_cancel(task.task_type(), task_id)?;
        self.log_transition(&task, "stop requested".to_string())?;
        Ok(())
    }

    /// `RUNNING -> PAUSED` on both the task and its live execution.
    pub fn pause_task(&self, task_id: TaskId) -> Result<(), FxFloorError> {
        let mut task = self.load_task(task_id)?;
        let now = Utc::now();
        task.pause(now)?;

        if let Some(mut execution) = self.executions.latest(task.task_type(), task_id)? {
            if execution.status == TaskStatus::Running {
                execution.status = TaskStatus::Paused;
                self.executions.update(execution)?;
            }
        }
        self.tasks.upsert(task.clone())?;
        self.log_transition(&task, "task paused".to_string())?;
        Ok(())
    }

    /// `PAUSED | STOPPED -> RUNNING`, preserving started_at, logs and metrics.
    pub fn resume_task(&self, task_id: TaskId) -> Result<(), FxFloorError> {
        let mut task = self.load_task(task_id)?;
        let now = Utc::now();
        task.resume(now)?;

        if let Some(mut execution) = self.executions.latest(task.task_type(), task_id)? {
            if execution.status == TaskStatus::Paused {
                execution.status = TaskStatus::Running;
                self.executions.update(execution)?;
            }
        }
        self.tasks.upsert(task.clone())?;
        self.log_transition(&task, "task resumed".to_string())?;
        Ok(())
    }

    /// Restart a terminal task from scratch, clearing execution data and counting
    /// the retry. The task returns to `CREATED` ready for a fresh submit.
    pub fn restart_task(&self, task_id: TaskId) -> Result<Task, FxFloorError> {
        let mut task = self.load_task(task_id)?;
        task.restart(Utc::now())?;
        self.tasks.upsert(task.clone())?;
        self.log_transition(
            &task,
            format!("task restarted (retry {}/{})", task.retry_count, task.max_retries),
        )?;
        info!(%task_id, retry_count = task.retry_count, "task restarted");
        Ok(task)
    }
}
