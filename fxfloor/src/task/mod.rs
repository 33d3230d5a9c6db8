use crate::error::FxFloorError;
use chrono::{DateTime, Utc};
use derive_more::Display;
use fxfloor_instrument::InstrumentSymbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use uuid::Uuid;

/// Task, execution, log and metric repositories.
pub mod repository;

pub type TaskId = Uuid;

/// Kind tag of a task.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[display("backtest")]
    Backtest,
    #[display("trading")]
    Trading,
}

/// Lifecycle status of a task or execution.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[display("created")]
    Created,
    #[display("running")]
    Running,
    #[display("paused")]
    Paused,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("stopped")]
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

/// A named, schema-validated strategy parameterisation owned by a user.
///
/// `(owner, name)` is unique; `parameters` is validated against the strategy's
/// declared schema before persistence and before every task start.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfigRecord {
    pub id: Uuid,
    pub owner: SmolStr,
    pub name: SmolStr,
    pub strategy_type: SmolStr,
    pub parameters: Value,
}

/// Backtest-specific task fields.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BacktestSpec {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub instrument: InstrumentSymbol,
    pub initial_balance: Decimal,
    pub commission_per_trade: Decimal,
    pub data_source: SmolStr,
}

impl BacktestSpec {
    /// `start_time < end_time <= now`, positive starting balance.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if self.start_time >= self.end_time {
            return Err(FxFloorError::validation(format!(
                "start_time {} must precede end_time {}",
                self.start_time, self.end_time
            )));
        }
        if self.end_time > now {
            return Err(FxFloorError::validation(
                "end_time must not be in the future",
            ));
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(FxFloorError::validation("initial_balance must be positive"));
        }
        if self.commission_per_trade < Decimal::ZERO {
            return Err(FxFloorError::validation(
                "commission_per_trade must not be negative",
            ));
        }
        Ok(())
    }
}

/// Trading-specific task fields.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TradingSpec {
    pub account_id: SmolStr,
    /// Close all open positions when the task is stopped.
    pub sell_on_stop: bool,
}

/// Tagged task variant.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "task_type", rename_all = "lowercase")]
pub enum TaskKind {
    Backtest(BacktestSpec),
    Trading(TradingSpec),
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::Backtest(_) => TaskType::Backtest,
            TaskKind::Trading(_) => TaskType::Trading,
        }
    }
}

/// A long-running trading or backtest task.
///
/// Status mutates only through the transition methods below; every illegal
/// transition is a validation error that leaves the task unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: SmolStr,
    pub name: SmolStr,
    pub config: StrategyConfigRecord,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    /// Token of the worker run currently executing this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_token: Option<Uuid>,
    /// Per-tick strategy state checkpoint, opaque to the engine.
    #[serde(default)]
    pub strategy_state: Value,
}

impl Task {
    pub fn new(
        owner: SmolStr,
        name: SmolStr,
        config: StrategyConfigRecord,
        kind: TaskKind,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            name,
            config,
            kind,
            status: TaskStatus::Created,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            result_data: None,
            run_token: None,
            strategy_state: Value::Null,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }

    fn illegal(&self, action: &str) -> FxFloorError {
        let message = format!(
            "cannot {action} task in status '{}' (task {})",
            self.status, self.id
        );
        if self.status == TaskStatus::Stopped && action == "submit" {
            FxFloorError::validation_with_suggestion(
                message,
                "use restart to clear execution data, or resume to continue",
            )
        } else {
            FxFloorError::validation(message)
        }
    }

    /// `CREATED -> RUNNING`.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if self.status != TaskStatus::Created {
            return Err(self.illegal("submit"));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `RUNNING -> PAUSED`.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if self.status != TaskStatus::Running {
            return Err(self.illegal("pause"));
        }
        self.status = TaskStatus::Paused;
        self.updated_at = now;
        Ok(())
    }

    /// `PAUSED | STOPPED -> RUNNING`, preserving `started_at`, logs and metrics.
    /// Only terminal bookkeeping is cleared.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if !matches!(self.status, TaskStatus::Paused | TaskStatus::Stopped) {
            return Err(self.illegal("resume"));
        }
        self.status = TaskStatus::Running;
        self.completed_at = None;
        self.error_message = None;
        self.run_token = None;
        self.updated_at = now;
        Ok(())
    }

    /// `RUNNING | PAUSED -> STOPPED`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if !matches!(self.status, TaskStatus::Running | TaskStatus::Paused) {
            return Err(self.illegal("stop"));
        }
        self.status = TaskStatus::Stopped;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `RUNNING -> COMPLETED`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if self.status != TaskStatus::Running {
            return Err(self.illegal("complete"));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `RUNNING | PAUSED -> FAILED`, recording the error.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if !matches!(self.status, TaskStatus::Running | TaskStatus::Paused) {
            return Err(self.illegal("fail"));
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Any terminal status `-> CREATED`, clearing all execution data and counting
    /// the retry. Fails with `RetryLimitExceeded` once the budget is spent.
    pub fn restart(&mut self, now: DateTime<Utc>) -> Result<(), FxFloorError> {
        if !self.status.is_terminal() {
            return Err(self.illegal("restart"));
        }
        if self.retry_count >= self.max_retries {
            return Err(FxFloorError::RetryLimitExceeded {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.status = TaskStatus::Created;
        self.retry_count += 1;
        self.run_token = None;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        self.result_data = None;
        self.strategy_state = Value::Null;
        self.updated_at = now;
        Ok(())
    }
}

/// One execution attempt of a task.
///
/// `execution_number` is monotonically increasing per task and gap-free; exactly
/// one execution per task is non-terminal at a time.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TaskExecutionRecord {
    pub id: Uuid,
    pub task_type: TaskType,
    pub task_id: TaskId,
    pub execution_number: u32,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Integer percent of work completed.
    pub progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new(
            SmolStr::new("user-1"),
            SmolStr::new("eurusd floor"),
            StrategyConfigRecord {
                id: Uuid::new_v4(),
                owner: SmolStr::new("user-1"),
                name: SmolStr::new("floor default"),
                strategy_type: SmolStr::new("floor"),
                parameters: json!({}),
            },
            TaskKind::Trading(TradingSpec {
                account_id: SmolStr::new("acct-1"),
                sell_on_stop: false,
            }),
            3,
        )
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut task = task();
        let now = Utc::now();

        task.submit(now).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.pause(now).unwrap();
        task.resume(now).unwrap();
        task.complete(now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut task = task();
        let before = task.clone();

        assert!(task.pause(Utc::now()).is_err());
        assert!(task.complete(Utc::now()).is_err());
        assert_eq!(task, before);
    }

    #[test]
    fn test_submit_on_stopped_suggests_restart_or_resume() {
        let mut task = task();
        let now = Utc::now();
        task.submit(now).unwrap();
        task.stop(now).unwrap();

        let error = task.submit(now).unwrap_err();
        assert_eq!(error.kind(), "validation_error");
        assert!(error.suggestion().unwrap().contains("restart"));
    }

    #[test]
    fn test_resume_preserves_started_at() {
        let mut task = task();
        let now = Utc::now();
        task.submit(now).unwrap();
        let started_at = task.started_at;
        task.stop(now).unwrap();

        task.resume(now).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.started_at, started_at);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_restart_clears_execution_data_and_counts_retry() {
        let mut task = task();
        let now = Utc::now();
        task.submit(now).unwrap();
        task.fail("boom", now).unwrap();
        task.strategy_state = json!({"ticks_seen": 9});
        task.result_data = Some(json!({"total_pnl": "1"}));

        task.restart(now).unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.retry_count, 1);
        assert!(task.started_at.is_none());
        assert!(task.error_message.is_none());
        assert!(task.result_data.is_none());
        assert!(task.strategy_state.is_null());
    }

    #[test]
    fn test_restart_respects_retry_limit() {
        let mut task = task();
        task.max_retries = 1;
        let now = Utc::now();

        task.submit(now).unwrap();
        task.fail("boom", now).unwrap();
        task.restart(now).unwrap();

        task.submit(now).unwrap();
        task.fail("boom again", now).unwrap();
        let error = task.restart(now).unwrap_err();
        assert_eq!(error.kind(), "retry_limit_exceeded");
    }

    #[test]
    fn test_restart_requires_terminal_status() {
        let mut task = task();
        assert!(task.restart(Utc::now()).is_err());
        task.submit(Utc::now()).unwrap();
        assert!(task.restart(Utc::now()).is_err());
    }
}
