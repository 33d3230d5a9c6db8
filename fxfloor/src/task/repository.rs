use crate::{
    error::FxFloorError,
    task::{Task, TaskExecutionRecord, TaskId, TaskKind, TaskStatus, TaskType},
};
use chrono::{DateTime, Utc};
use fxfloor_integration::event::EventSeverity;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// Storage interface for task rows.
pub trait TaskRepository: Send + Sync {
    fn get(&self, task_id: TaskId) -> Result<Option<Task>, FxFloorError>;

    fn upsert(&self, task: Task) -> Result<(), FxFloorError>;

    /// Id of a RUNNING trading task on the provided account, excluding `exclude`.
    /// Backs the one-running-task-per-account invariant.
    fn running_trading_task_on_account(
        &self,
        account_id: &str,
        exclude: TaskId,
    ) -> Result<Option<TaskId>, FxFloorError>;
}

/// Storage interface for task execution rows.
pub trait TaskExecutionRepository: Send + Sync {
    /// Allocate the next execution for a task: numbering is gap-free from 1, and
    /// allocation fails while another execution is still non-terminal.
    fn begin(
        &self,
        task_type: TaskType,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskExecutionRecord, FxFloorError>;

    fn update(&self, execution: TaskExecutionRecord) -> Result<(), FxFloorError>;

    fn latest(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Option<TaskExecutionRecord>, FxFloorError>;

    fn list(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Vec<TaskExecutionRecord>, FxFloorError>;
}

/// Storage interface for per-execution log lines.
pub trait TaskLogRepository: Send + Sync {
    fn append(&self, execution_id: Uuid, level: EventSeverity, message: String, context: Value);
}

/// Storage interface for per-execution metric rows.
pub trait TaskMetricRepository: Send + Sync {
    fn append(&self, execution_id: Uuid, time: DateTime<Utc>, metrics: Value);
}

/// In-memory [`TaskRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn get(&self, task_id: TaskId) -> Result<Option<Task>, FxFloorError> {
        Ok(self.tasks.lock().get(&task_id).cloned())
    }

    fn upsert(&self, task: Task) -> Result<(), FxFloorError> {
        self.tasks.lock().insert(task.id, task);
        Ok(())
    }

    fn running_trading_task_on_account(
        &self,
        account_id: &str,
        exclude: TaskId,
    ) -> Result<Option<TaskId>, FxFloorError> {
        Ok(self
            .tasks
            .lock()
            .values()
            .find(|task| {
                task.id != exclude
                    && task.status == TaskStatus::Running
                    && matches!(
                        &task.kind,
                        TaskKind::Trading(spec) if spec.account_id == account_id
                    )
            })
            .map(|task| task.id))
    }
}

/// In-memory [`TaskExecutionRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskExecutionRepository {
    executions: Arc<Mutex<HashMap<(TaskType, TaskId), Vec<TaskExecutionRecord>>>>,
}

impl InMemoryTaskExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskExecutionRepository for InMemoryTaskExecutionRepository {
    fn begin(
        &self,
        task_type: TaskType,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskExecutionRecord, FxFloorError> {
        let mut executions = self.executions.lock();
        let rows = executions.entry((task_type, task_id)).or_default();

        if let Some(active) = rows.iter().find(|row| !row.status.is_terminal()) {
            return Err(FxFloorError::validation(format!(
                "execution #{} of task {task_id} is still {}",
                active.execution_number, active.status
            )));
        }

        let execution = TaskExecutionRecord {
            id: Uuid::new_v4(),
            task_type,
            task_id,
            execution_number: rows.len() as u32 + 1,
            status: TaskStatus::Running,
            started_at: now,
            completed_at: None,
            error_message: None,
            progress: 0,
        };
        rows.push(execution.clone());
        Ok(execution)
    }

    fn update(&self, execution: TaskExecutionRecord) -> Result<(), FxFloorError> {
        let mut executions = self.executions.lock();
        let rows = executions
            .entry((execution.task_type, execution.task_id))
            .or_default();
        match rows.iter_mut().find(|row| row.id == execution.id) {
            Some(row) => {
                *row = execution;
                Ok(())
            }
            None => Err(FxFloorError::Repository(format!(
                "execution {} not found",
                execution.id
            ))),
        }
    }

    fn latest(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Option<TaskExecutionRecord>, FxFloorError> {
        Ok(self
            .executions
            .lock()
            .get(&(task_type, task_id))
            .and_then(|rows| rows.last().cloned()))
    }

    fn list(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Vec<TaskExecutionRecord>, FxFloorError> {
        Ok(self
            .executions
            .lock()
            .get(&(task_type, task_id))
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory [`TaskLogRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskLogRepository {
    logs: Arc<Mutex<Vec<(Uuid, EventSeverity, String, Value)>>>,
}

impl InMemoryTaskLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_execution(&self, execution_id: Uuid) -> Vec<(EventSeverity, String)> {
        self.logs
            .lock()
            .iter()
            .filter(|(id, ..)| *id == execution_id)
            .map(|(_, level, message, _)| (*level, message.clone()))
            .collect()
    }
}

impl TaskLogRepository for InMemoryTaskLogRepository {
    fn append(&self, execution_id: Uuid, level: EventSeverity, message: String, context: Value) {
        self.logs.lock().push((execution_id, level, message, context));
    }
}

/// In-memory [`TaskMetricRepository`] used for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskMetricRepository {
    metrics: Arc<Mutex<Vec<(Uuid, DateTime<Utc>, Value)>>>,
}

impl InMemoryTaskMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_execution(&self, execution_id: Uuid) -> Vec<Value> {
        self.metrics
            .lock()
            .iter()
            .filter(|(id, ..)| *id == execution_id)
            .map(|(_, _, metrics)| metrics.clone())
            .collect()
    }
}

impl TaskMetricRepository for InMemoryTaskMetricRepository {
    fn append(&self, execution_id: Uuid, time: DateTime<Utc>, metrics: Value) {
        self.metrics.lock().push((execution_id, time, metrics));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (TaskType, TaskId) {
        (TaskType::Backtest, Uuid::new_v4())
    }

    #[test]
    fn test_execution_numbers_are_gap_free_from_one() {
        let repository = InMemoryTaskExecutionRepository::new();
        let (task_type, task_id) = ids();

        for expected in 1..=3u32 {
            let mut execution = repository.begin(task_type, task_id, Utc::now()).unwrap();
            assert_eq!(execution.execution_number, expected);
            execution.status = TaskStatus::Completed;
            repository.update(execution).unwrap();
        }

        let numbers: Vec<u32> = repository
            .list(task_type, task_id)
            .unwrap()
            .iter()
            .map(|row| row.execution_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_at_most_one_non_terminal_execution() {
        let repository = InMemoryTaskExecutionRepository::new();
        let (task_type, task_id) = ids();

        repository.begin(task_type, task_id, Utc::now()).unwrap();
        let error = repository.begin(task_type, task_id, Utc::now()).unwrap_err();
        assert_eq!(error.kind(), "validation_error");
    }

    #[test]
    fn test_latest_returns_most_recent_execution() {
        let repository = InMemoryTaskExecutionRepository::new();
        let (task_type, task_id) = ids();

        let mut first = repository.begin(task_type, task_id, Utc::now()).unwrap();
        first.status = TaskStatus::Failed;
        repository.update(first).unwrap();
        let second = repository.begin(task_type, task_id, Utc::now()).unwrap();

        let latest = repository.latest(task_type, task_id).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.execution_number, 2);
    }
}
