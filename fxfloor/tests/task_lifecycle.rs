use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::BoxStream;
use fxfloor::{
    config::SystemConfig,
    engine::{NoopEventHandler, TaskExecutor},
    lock::TaskLockManager,
    task::{
        BacktestSpec, StrategyConfigRecord, Task, TaskKind, TaskStatus, TaskType, TradingSpec,
        repository::{
            InMemoryTaskExecutionRepository, InMemoryTaskLogRepository,
            InMemoryTaskMetricRepository, InMemoryTaskRepository, TaskExecutionRepository,
            TaskRepository,
        },
    },
};
use fxfloor_data::{
    Tick,
    error::DataError,
    historical::InMemoryTickData,
    live::PricingFeed,
};
use fxfloor_instrument::InstrumentSymbol;
use fxfloor_integration::{event::InMemoryEventSink, kv::InMemoryKv};
use fxfloor_strategy::registry::StrategyRegistry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use smol_str::SmolStr;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    executor: TaskExecutor,
    tasks: InMemoryTaskRepository,
    executions: InMemoryTaskExecutionRepository,
    locks: TaskLockManager,
    events: InMemoryEventSink,
}

fn harness(config: SystemConfig) -> Harness {
    let tasks = InMemoryTaskRepository::new();
    let executions = InMemoryTaskExecutionRepository::new();
    let logs = InMemoryTaskLogRepository::new();
    let metrics = InMemoryTaskMetricRepository::new();
    let events = InMemoryEventSink::new();
    let locks = TaskLockManager::new(Arc::new(InMemoryKv::new()), config.clone());

    let executor = TaskExecutor::new(
        config,
        Arc::new(StrategyRegistry::with_builtins()),
        Arc::new(tasks.clone()),
        Arc::new(executions.clone()),
        Arc::new(logs.clone()),
        Arc::new(metrics.clone()),
        locks.clone(),
        Arc::new(events.clone()),
        "worker-test",
    );

    Harness {
        executor,
        tasks,
        executions,
        locks,
        events,
    }
}

fn floor_params() -> serde_json::Value {
    json!({
        "instrument": "EUR_USD",
        "base_lot_size": 1,
        "retracement_lot_mode": "constant",
        "retracement_lot_amount": 0,
        "retracement_pips": 20,
        "take_profit_pips": 10,
        "max_layers": 2,
        "max_retracements_per_layer": 1,
        "entry_signal_lookback_ticks": 2,
    })
}

fn strategy_config() -> StrategyConfigRecord {
    StrategyConfigRecord {
        id: Uuid::new_v4(),
        owner: SmolStr::new("user-1"),
        name: SmolStr::new("floor default"),
        strategy_type: SmolStr::new("floor"),
        parameters: floor_params(),
    }
}

fn range() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = DateTime::UNIX_EPOCH;
    (start, start + TimeDelta::hours(1))
}

fn backtest_task() -> Task {
    let (start_time, end_time) = range();
    Task::new(
        SmolStr::new("user-1"),
        SmolStr::new("eurusd backtest"),
        strategy_config(),
        TaskKind::Backtest(BacktestSpec {
            start_time,
            end_time,
            instrument: InstrumentSymbol::new("EUR_USD"),
            initial_balance: dec!(10000),
            commission_per_trade: Decimal::ZERO,
            data_source: SmolStr::new("fixtures"),
        }),
        3,
    )
}

fn trading_task(account: &str) -> Task {
    Task::new(
        SmolStr::new("user-1"),
        SmolStr::new("eurusd live"),
        strategy_config(),
        TaskKind::Trading(TradingSpec {
            account_id: SmolStr::new(account),
            sell_on_stop: false,
        }),
        3,
    )
}

fn data_source() -> InMemoryTickData {
    let (start, _) = range();
    let ticks: Vec<Tick> = (0..120i64)
        .map(|step| {
            let mid = dec!(1.0850) + Decimal::new(step % 40, 4);
            Tick::new(
                InstrumentSymbol::new("EUR_USD"),
                start + TimeDelta::seconds(step),
                mid - dec!(0.0001),
                mid + dec!(0.0001),
            )
            .unwrap()
        })
        .collect();
    InMemoryTickData::new(ticks)
}

#[tokio::test]
async fn test_backtest_runs_to_completion() {
    let harness = harness(SystemConfig::default());
    let task = backtest_task();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    let report = harness
        .executor
        .execute_backtest(task_id, &data_source())
        .await
        .unwrap();

    let task = harness.tasks.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.result_data.is_some());
    assert!(!task.strategy_state.is_null());
    assert!(task.run_token.is_none());

    let executions = harness
        .executions
        .list(TaskType::Backtest, task_id)
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].execution_number, 1);
    assert_eq!(executions[0].status, TaskStatus::Completed);
    assert_eq!(executions[0].progress, 100);

    // Lock released: a fresh acquire succeeds.
    assert!(harness
        .locks
        .acquire(TaskType::Backtest, task_id, None, "other-worker")
        .unwrap());

    // Conservation holds through the full stack.
    let net: Decimal = report.trade_log.iter().map(|trade| trade.net_pnl()).sum();
    assert_eq!(report.final_balance - dec!(10000), net);
    assert!(harness.events.events_of_kind("task_started").len() == 1);
}

#[tokio::test]
async fn test_submit_refused_while_lock_held() {
    let harness = harness(SystemConfig::default());
    let task = backtest_task();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    assert!(harness
        .locks
        .acquire(TaskType::Backtest, task_id, None, "another-worker")
        .unwrap());

    let error = harness.executor.submit(task_id).unwrap_err();
    assert_eq!(error.kind(), "already_running");

    // The task was left untouched.
    let task = harness.tasks.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Created);
}

#[tokio::test]
async fn test_one_running_trading_task_per_account() {
    let harness = harness(SystemConfig::default());

    let mut running = trading_task("acct-1");
    running.submit(Utc::now()).unwrap();
    harness.tasks.upsert(running).unwrap();

    let second = trading_task("acct-1");
    let second_id = second.id;
    harness.tasks.upsert(second).unwrap();

    let error = harness.executor.submit(second_id).unwrap_err();
    assert_eq!(error.kind(), "already_running");

    // A different account is unaffected.
    let other = trading_task("acct-2");
    let other_id = other.id;
    harness.tasks.upsert(other).unwrap();
    assert!(harness.executor.submit(other_id).is_ok());
}

#[tokio::test]
async fn test_invalid_parameters_fail_fast() {
    let harness = harness(SystemConfig::default());
    let mut task = backtest_task();
    task.config.parameters = json!({"instrument": "EUR_USD"});
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    let error = harness.executor.submit(task_id).unwrap_err();
    assert_eq!(error.kind(), "validation_error");

    // No lock is left behind after a validation failure.
    assert!(harness
        .locks
        .acquire(TaskType::Backtest, task_id, None, "worker")
        .unwrap());
}

#[tokio::test]
async fn test_submit_on_stopped_task_suggests_restart_or_resume() {
    let harness = harness(SystemConfig::default());
    let mut task = backtest_task();
    let now = Utc::now();
    task.submit(now).unwrap();
    task.stop(now).unwrap();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    let error = harness.executor.submit(task_id).unwrap_err();
    assert_eq!(error.kind(), "validation_error");
    assert!(error.suggestion().unwrap().contains("resume"));
}

#[tokio::test]
async fn test_restart_clears_and_counts_then_exhausts() {
    let harness = harness(SystemConfig::default());
    let mut task = backtest_task();
    task.max_retries = 1;
    let now = Utc::now();
    task.submit(now).unwrap();
    task.fail("stream died", now).unwrap();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    let restarted = harness.executor.restart_task(task_id).unwrap();
    assert_eq!(restarted.status, TaskStatus::Created);
    assert_eq!(restarted.retry_count, 1);
    assert!(restarted.error_message.is_none());

    let mut failed_again = harness.tasks.get(task_id).unwrap().unwrap();
    failed_again.submit(now).unwrap();
    failed_again.fail("still broken", now).unwrap();
    harness.tasks.upsert(failed_again).unwrap();

    let error = harness.executor.restart_task(task_id).unwrap_err();
    assert_eq!(error.kind(), "retry_limit_exceeded");
}

#[tokio::test]
async fn test_request_stop_sets_cooperative_flag() {
    let harness = harness(SystemConfig::default());
    let mut task = backtest_task();
    task.submit(Utc::now()).unwrap();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    harness.executor.request_stop(task_id).unwrap();
    assert!(harness
        .locks
        .check_cancel(TaskType::Backtest, task_id)
        .unwrap());
}

#[tokio::test]
async fn test_pause_and_resume_round_trip() {
    let harness = harness(SystemConfig::default());
    let task = backtest_task();
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();
    harness.executor.submit(task_id).unwrap();

    harness.executor.pause_task(task_id).unwrap();
    let paused = harness.tasks.get(task_id).unwrap().unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    let execution = harness
        .executions
        .latest(TaskType::Backtest, task_id)
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, TaskStatus::Paused);

    harness.executor.resume_task(task_id).unwrap();
    let resumed = harness.tasks.get(task_id).unwrap().unwrap();
    assert_eq!(resumed.status, TaskStatus::Running);
    assert_eq!(resumed.started_at, paused.started_at);
}

/// Finite scripted pricing feed: one batch of ticks, then connection errors.
struct ScriptedFeed {
    batches: Mutex<Vec<Vec<Tick>>>,
}

#[async_trait]
impl PricingFeed for ScriptedFeed {
    fn instrument(&self) -> InstrumentSymbol {
        InstrumentSymbol::new("EUR_USD")
    }

    async fn connect(&self) -> Result<BoxStream<'static, Result<Tick, DataError>>, DataError> {
        let mut batches = self.batches.lock();
        if batches.is_empty() {
            return Err(DataError::Feed("stream gone".into()));
        }
        let batch = batches.remove(0);
        Ok(Box::pin(futures::stream::iter(batch.into_iter().map(Ok))))
    }
}

#[tokio::test]
async fn test_trading_run_checkpoints_state_and_stops() {
    let config = SystemConfig {
        stream_max_reconnect_attempts: 0,
        stream_backoff_intervals: vec![0],
        ..SystemConfig::default()
    };
    let harness = harness(config);

    let task = trading_task("acct-1");
    let task_id = task.id;
    harness.tasks.upsert(task).unwrap();

    let (start, _) = range();
    let ticks: Vec<Tick> = (0..5i64)
        .map(|step| {
            Tick::new(
                InstrumentSymbol::new("EUR_USD"),
                start + TimeDelta::seconds(step),
                dec!(1.0849),
                dec!(1.0851),
            )
            .unwrap()
        })
        .collect();
    let feed = Arc::new(ScriptedFeed {
        batches: Mutex::new(vec![ticks]),
    });

    harness
        .executor
        .execute_trading(task_id, feed, Arc::new(NoopEventHandler))
        .await
        .unwrap();

    let task = harness.tasks.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Stopped);
    // The per-tick checkpoint captured strategy progress.
    assert_eq!(task.strategy_state["ticks_seen"], json!(5));

    let execution = harness
        .executions
        .latest(TaskType::Trading, task_id)
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, TaskStatus::Stopped);

    // Lock released on the way out.
    assert!(harness
        .locks
        .acquire(TaskType::Trading, task_id, None, "worker")
        .unwrap());
}
