use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backoff intervals between stream reconnection attempts.
pub const DEFAULT_BACKOFF_INTERVALS: [u64; 5] = [1, 2, 4, 8, 16];

/// Default maximum number of consecutive reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 5;

/// A [`Stream`](futures::Stream) item produced by a reconnecting stream - either a
/// data item, or a marker that the inner stream disconnected and is being
/// re-initialised.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Event<Origin, T> {
    Reconnecting(Origin),
    Item(T),
}

/// Exponential backoff schedule for stream reconnections.
///
/// Retries through the configured intervals (default `[1, 2, 4, 8, 16]` seconds, 5
/// attempts), clamping at the final interval; a successful connection resets the
/// attempt counter.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ReconnectionSchedule {
    intervals_secs: Vec<u64>,
    max_attempts: usize,
    attempt: usize,
}

impl Default for ReconnectionSchedule {
    fn default() -> Self {
        Self::new(
            DEFAULT_BACKOFF_INTERVALS.to_vec(),
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }
}

impl ReconnectionSchedule {
    pub fn new(intervals_secs: Vec<u64>, max_attempts: usize) -> Self {
        Self {
            intervals_secs,
            max_attempts,
            attempt: 0,
        }
    }

    /// Whether another reconnection attempt should be made.
    pub fn should_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Backoff interval for the upcoming attempt, clamped to the final configured
    /// interval.
    pub fn next_delay(&self) -> Duration {
        let secs = self
            .intervals_secs
            .get(self.attempt)
            .or(self.intervals_secs.last())
            .copied()
            .unwrap_or(1);
        Duration::from_secs(secs)
    }

    /// Record a reconnection attempt.
    pub fn record_attempt(&mut self) -> usize {
        self.attempt += 1;
        self.attempt
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts recorded since the last successful connection.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Maximum configured attempts.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_walks_intervals_then_clamps() {
        let mut schedule = ReconnectionSchedule::default();

        let mut delays = Vec::new();
        while schedule.should_retry() {
            delays.push(schedule.next_delay().as_secs());
            schedule.record_attempt();
        }

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert!(!schedule.should_retry());
    }

    #[test]
    fn test_reset_after_successful_connection() {
        let mut schedule = ReconnectionSchedule::new(vec![1, 2], 2);
        schedule.record_attempt();
        schedule.record_attempt();
        assert!(!schedule.should_retry());

        schedule.reset();
        assert!(schedule.should_retry());
        assert_eq!(schedule.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_clamps_past_configured_intervals() {
        let mut schedule = ReconnectionSchedule::new(vec![1, 2], 10);
        schedule.record_attempt();
        schedule.record_attempt();
        schedule.record_attempt();
        assert_eq!(schedule.next_delay(), Duration::from_secs(2));
    }
}
