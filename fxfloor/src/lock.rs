use crate::{config::SystemConfig, error::FxFloorError, task::{TaskId, TaskType}};
use chrono::{DateTime, Utc};
use fxfloor_integration::kv::KvStore;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key prefix shared by every task lock.
pub const LOCK_KEY_PREFIX: &str = "task_lock:";

/// Page size used for cursor-based lock scans.
const SCAN_COUNT: usize = 100;

/// Payload stored under `task_lock:{type}:{id}`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LockData {
    pub acquired_at: DateTime<Utc>,
    pub acquired_by: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

/// Payload stored under `task_heartbeat:{type}:{id}`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HeartbeatData {
    pub last_beat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

/// Complete lock status snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LockInfo {
    pub lock: LockData,
    pub heartbeat: Option<HeartbeatData>,
    pub is_stale: bool,
}

/// Distributed task lock manager.
///
/// Guarantees at most one worker holds the lock for a given `(type, id)` at any
/// time via atomic conditional-set, with heartbeat liveness and a cursor-scan
/// sweeper that reaps locks whose worker crashed. Cancellation is a cooperative
/// flag the engine polls between ticks.
#[derive(Clone)]
pub struct TaskLockManager {
    kv: Arc<dyn KvStore>,
    config: SystemConfig,
}

impl std::fmt::Debug for TaskLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLockManager")
            .field("lock_ttl_seconds", &self.config.lock_ttl_seconds)
            .field("stale_threshold_seconds", &self.config.stale_threshold_seconds)
            .finish()
    }
}

fn lock_key(task_type: TaskType, task_id: TaskId) -> String {
    format!("task_lock:{task_type}:{task_id}")
}

fn heartbeat_key(task_type: TaskType, task_id: TaskId) -> String {
    format!("task_heartbeat:{task_type}:{task_id}")
}

fn cancel_key(task_type: TaskType, task_id: TaskId) -> String {
    format!("task_cancel:{task_type}:{task_id}")
}

impl TaskLockManager {
    pub fn new(kv: Arc<dyn KvStore>, config: SystemConfig) -> Self {
        Self { kv, config }
    }

    /// Acquire the execution lock for a task.
    ///
    /// Atomic conditional-set: succeeds iff no live lock exists. On success the
    /// initial heartbeat is written and any stale cancellation flag from previous
    /// runs is cleared.
    pub fn acquire(
        &self,
        task_type: TaskType,
        task_id: TaskId,
        execution_id: Option<Uuid>,
        worker_id: &str,
    ) -> Result<bool, FxFloorError> {
        let now = Utc::now();
        let lock = LockData {
            acquired_at: now,
            acquired_by: SmolStr::new(worker_id),
            execution_id,
        };
        let payload = serde_json::to_string(&lock).map_err(fxfloor_integration::error::KvError::from)?;

        let acquired =
            self.kv
                .set_if_absent(&lock_key(task_type, task_id), &payload, self.config.lock_ttl())?;

        if !acquired {
            warn!(%task_type, %task_id, "failed to acquire lock (already held)");
            return Ok(false);
        }

        self.kv.delete(&cancel_key(task_type, task_id))?;
        self.write_heartbeat(task_type, task_id, now, execution_id)?;

        info!(%task_type, %task_id, ?execution_id, "lock acquired");
        Ok(true)
    }

    /// Refresh the heartbeat, preserving the `execution_id` recorded on the lock.
    pub fn heartbeat(&self, task_type: TaskType, task_id: TaskId) -> Result<(), FxFloorError> {
        let execution_id = self
            .read_lock(task_type, task_id)?
            .and_then(|lock| lock.execution_id);
        self.write_heartbeat(task_type, task_id, Utc::now(), execution_id)?;
        debug!(%task_type, %task_id, "heartbeat updated");
        Ok(())
    }

    /// Whether the task's cooperative cancellation flag is set.
    pub fn check_cancel(&self, task_type: TaskType, task_id: TaskId) -> Result<bool, FxFloorError> {
        let cancelled = self
            .kv
            .get(&cancel_key(task_type, task_id))?
            .is_some_and(|flag| flag == "1");
        if cancelled {
            info!(%task_type, %task_id, "cancellation flag detected");
        }
        Ok(cancelled)
    }

    /// Set the cooperative cancellation flag, with the lock TTL.
    pub fn set_cancel(&self, task_type: TaskType, task_id: TaskId) -> Result<(), FxFloorError> {
        self.kv
            .set(&cancel_key(task_type, task_id), "1", self.config.lock_ttl())?;
        info!(%task_type, %task_id, "cancellation flag set");
        Ok(())
    }

    /// Release the lock, heartbeat and cancellation flag.
    pub fn release(&self, task_type: TaskType, task_id: TaskId) -> Result<(), FxFloorError> {
        self.kv.delete(&lock_key(task_type, task_id))?;
        self.kv.delete(&heartbeat_key(task_type, task_id))?;
        self.kv.delete(&cancel_key(task_type, task_id))?;
        info!(%task_type, %task_id, "lock released");
        Ok(())
    }

    /// Snapshot of the current lock state, if a lock exists.
    pub fn lock_info(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Option<LockInfo>, FxFloorError> {
        let Some(lock) = self.read_lock(task_type, task_id)? else {
            return Ok(None);
        };
        let heartbeat = self.read_heartbeat(task_type, task_id)?;
        let is_stale = self.is_stale(heartbeat.as_ref());
        Ok(Some(LockInfo {
            lock,
            heartbeat,
            is_stale,
        }))
    }

    /// Sweep all task locks with a cursor-based scan, releasing those whose
    /// heartbeat is absent or older than the stale threshold. Returns the number of
    /// locks reaped.
    pub fn sweep(&self) -> Result<usize, FxFloorError> {
        let mut cursor = 0u64;
        let mut scanned = 0usize;
        let mut reaped = 0usize;
        let pattern = format!("{LOCK_KEY_PREFIX}*");

        loop {
            let (next_cursor, keys) = self.kv.scan(cursor, &pattern, SCAN_COUNT)?;
            scanned += keys.len();

            for key in keys {
                let Some((task_type, task_id)) = parse_lock_key(&key) else {
                    warn!(key, "could not parse lock key");
                    continue;
                };
                if self.reap_if_stale(task_type, task_id)? {
                    reaped += 1;
                }
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        info!(found = scanned, reaped, "stale lock sweep completed");
        Ok(reaped)
    }

    /// Release one lock if its heartbeat is absent or stale.
    fn reap_if_stale(&self, task_type: TaskType, task_id: TaskId) -> Result<bool, FxFloorError> {
        if self.read_lock(task_type, task_id)?.is_none() {
            return Ok(false);
        }

        let heartbeat = self.read_heartbeat(task_type, task_id)?;
        if self.is_stale(heartbeat.as_ref()) {
            warn!(%task_type, %task_id, "stale lock detected, releasing");
            self.release(task_type, task_id)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_stale(&self, heartbeat: Option<&HeartbeatData>) -> bool {
        match heartbeat {
            None => true,
            Some(heartbeat) => {
                let age = Utc::now().signed_duration_since(heartbeat.last_beat);
                age.num_seconds() > self.config.stale_threshold_seconds as i64
            }
        }
    }

    fn read_lock(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Option<LockData>, FxFloorError> {
        Ok(self
            .kv
            .get(&lock_key(task_type, task_id))?
            .and_then(|payload| serde_json::from_str(&payload).ok()))
    }

    fn read_heartbeat(
        &self,
        task_type: TaskType,
        task_id: TaskId,
    ) -> Result<Option<HeartbeatData>, FxFloorError> {
        Ok(self
            .kv
            .get(&heartbeat_key(task_type, task_id))?
            .and_then(|payload| serde_json::from_str(&payload).ok()))
    }

    fn write_heartbeat(
        &self,
        task_type: TaskType,
        task_id: TaskId,
        last_beat: DateTime<Utc>,
        execution_id: Option<Uuid>,
    ) -> Result<(), FxFloorError> {
        let heartbeat = HeartbeatData {
            last_beat,
            execution_id,
        };
        let payload =
            serde_json::to_string(&heartbeat).map_err(fxfloor_integration::error::KvError::from)?;
        self.kv
            .set(&heartbeat_key(task_type, task_id), &payload, self.config.lock_ttl())?;
        Ok(())
    }
}

fn parse_lock_key(key: &str) -> Option<(TaskType, TaskId)> {
    let mut parts = key.rsplit(':');
    let task_id: TaskId = parts.next()?.parse().ok()?;
    let task_type = match parts.next()? {
        "backtest" => TaskType::Backtest,
        "trading" => TaskType::Trading,
        _ => return None,
    };
    Some((task_type, task_id))
}
