use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_lock_ttl() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_threshold() -> u64 {
    300
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_stream_max_reconnects() -> usize {
    5
}

fn default_stream_backoff() -> Vec<u64> {
    vec![1, 2, 4, 8, 16]
}

fn default_ws_batch_size() -> usize {
    10
}

fn default_ws_batch_interval_ms() -> u64 {
    100
}

fn default_backtest_memory_limit() -> usize {
    2_000_000
}

/// System configuration surface.
///
/// All durations are seconds unless suffixed otherwise. `heartbeat_interval_seconds`
/// must stay below `lock_ttl_seconds` so a healthy worker never loses its lock.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct SystemConfig {
    /// TTL of lock / heartbeat / cancel keys.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,

    /// Heartbeat refresh cadence.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Stale-lock sweep threshold.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,

    /// Broker reconciliation cadence.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,

    /// Maximum consecutive stream reconnection attempts.
    #[serde(default = "default_stream_max_reconnects")]
    pub stream_max_reconnect_attempts: usize,

    /// Backoff intervals between stream reconnections.
    #[serde(default = "default_stream_backoff")]
    pub stream_backoff_intervals: Vec<u64>,

    /// Default per-client WebSocket batch size.
    #[serde(default = "default_ws_batch_size")]
    pub ws_batch_size: usize,

    /// Default per-client WebSocket batch interval.
    #[serde(default = "default_ws_batch_interval_ms")]
    pub ws_batch_interval_ms: u64,

    /// Ceiling on retained backtest ticks; longer ranges are downsampled.
    #[serde(default = "default_backtest_memory_limit")]
    pub backtest_memory_limit: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: default_lock_ttl(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            stale_threshold_seconds: default_stale_threshold(),
            reconcile_interval_seconds: default_reconcile_interval(),
            stream_max_reconnect_attempts: default_stream_max_reconnects(),
            stream_backoff_intervals: default_stream_backoff(),
            ws_batch_size: default_ws_batch_size(),
            ws_batch_interval_ms: default_ws_batch_interval_ms(),
            backtest_memory_limit: default_backtest_memory_limit(),
        }
    }
}

impl SystemConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_seconds >= self.lock_ttl_seconds {
            return Err(format!(
                "heartbeat_interval_seconds ({}) must be < lock_ttl_seconds ({})",
                self.heartbeat_interval_seconds, self.lock_ttl_seconds
            ));
        }
        if self.ws_batch_size == 0 {
            return Err("ws_batch_size must be >= 1".into());
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn ws_batch_interval(&self) -> Duration {
        Duration::from_millis(self.ws_batch_interval_ms)
    }

    /// Reconnection schedule for broker streams.
    pub fn stream_schedule(&self) -> fxfloor_data::reconnect::ReconnectionSchedule {
        fxfloor_data::reconnect::ReconnectionSchedule::new(
            self.stream_backoff_intervals.clone(),
            self.stream_max_reconnect_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SystemConfig::default();
        assert_eq!(config.lock_ttl_seconds, 300);
        assert_eq!(config.heartbeat_interval_seconds, 30);
        assert_eq!(config.stale_threshold_seconds, 300);
        assert_eq!(config.reconcile_interval_seconds, 300);
        assert_eq!(config.stream_max_reconnect_attempts, 5);
        assert_eq!(config.stream_backoff_intervals, vec![1, 2, 4, 8, 16]);
        assert_eq!(config.ws_batch_size, 10);
        assert_eq!(config.ws_batch_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_undercut_lock_ttl() {
        let config = SystemConfig {
            heartbeat_interval_seconds: 300,
            ..SystemConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_overrides_keep_other_defaults() {
        let config: SystemConfig =
            serde_json::from_str(r#"{"lock_ttl_seconds": 120, "heartbeat_interval_seconds": 10}"#)
                .unwrap();
        assert_eq!(config.lock_ttl_seconds, 120);
        assert_eq!(config.stale_threshold_seconds, 300);
        assert!(config.validate().is_ok());
    }
}
