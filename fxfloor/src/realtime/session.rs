use crate::{config::SystemConfig, realtime::{Broadcast, TickPayload}};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Smallest configurable batch size.
pub const MIN_BATCH_SIZE: usize = 1;

/// Largest configurable batch size.
pub const MAX_BATCH_SIZE: usize = 100;

/// Shortest configurable batch interval.
pub const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Longest configurable batch interval.
pub const MAX_BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Per-connection tick batching configuration.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
}

impl BatchingConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            enabled: true,
            batch_size: config.ws_batch_size,
            batch_interval_ms: config.ws_batch_interval_ms,
        }
        .clamped()
    }

    /// Clamp to the supported ranges: size `[1, 100]`, interval `[10ms, 1s]`.
    pub fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self.batch_interval_ms = self
            .batch_interval_ms
            .clamp(MIN_BATCH_INTERVAL.as_millis() as u64, MAX_BATCH_INTERVAL.as_millis() as u64);
        self
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    TickUpdate {
        data: TickPayload,
    },
    TickBatch {
        count: usize,
        updates: Vec<TickPayload>,
    },
    ConnectionStatus {
        data: Value,
    },
    PnlUpdate {
        data: Value,
    },
    DemoReminder {
        message: String,
        is_demo: bool,
    },
    AdminNotification {
        data: Value,
    },
    Pong,
    BatchingConfigured {
        enabled: bool,
        batch_size: usize,
        batch_interval_ms: u64,
    },
}

/// Client-to-server frames.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping,
    ConfigureBatching {
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        batch_size: Option<usize>,
        #[serde(default)]
        batch_interval_ms: Option<u64>,
    },
}

/// Per-client session state: buffers tick broadcasts and emits either when the
/// buffer reaches `batch_size` or the batch interval elapses. Non-tick broadcasts
/// pass through immediately.
#[derive(Debug, Clone)]
pub struct ClientSession {
    config: BatchingConfig,
    buffer: Vec<TickPayload>,
}

impl ClientSession {
    pub fn new(config: BatchingConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
        }
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Handle one hub broadcast, returning a frame when one is due.
    pub fn on_broadcast(&mut self, broadcast: Broadcast) -> Option<OutboundMessage> {
        match broadcast {
            Broadcast::Tick(tick) => {
                if !self.config.enabled {
                    return Some(OutboundMessage::TickUpdate { data: tick });
                }
                self.buffer.push(tick);
                if self.buffer.len() >= self.config.batch_size {
                    self.flush()
                } else {
                    None
                }
            }
            Broadcast::Pnl(data) => Some(OutboundMessage::PnlUpdate { data }),
            Broadcast::ConnectionStatus(data) => Some(OutboundMessage::ConnectionStatus { data }),
            Broadcast::DemoReminder(message) => Some(OutboundMessage::DemoReminder {
                message,
                is_demo: true,
            }),
            Broadcast::Admin(data) => Some(OutboundMessage::AdminNotification { data }),
        }
    }

    /// Flush buffered ticks, preserving arrival order. Called when the batch
    /// interval elapses and on disconnect.
    pub fn flush(&mut self) -> Option<OutboundMessage> {
        if self.buffer.is_empty() {
            return None;
        }
        let updates = std::mem::take(&mut self.buffer);
        Some(OutboundMessage::TickBatch {
            count: updates.len(),
            updates,
        })
    }

    /// Handle one client text frame.
    pub fn on_client_text(&mut self, text: &str) -> Option<OutboundMessage> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::Ping) => Some(OutboundMessage::Pong),
            Ok(InboundMessage::ConfigureBatching {
                enabled,
                batch_size,
                batch_interval_ms,
            }) => {
                if let Some(enabled) = enabled {
                    self.config.enabled = enabled;
                }
                if let Some(batch_size) = batch_size {
                    self.config.batch_size = batch_size;
                }
                if let Some(batch_interval_ms) = batch_interval_ms {
                    self.config.batch_interval_ms = batch_interval_ms;
                }
                self.config = self.config.clone().clamped();
                Some(OutboundMessage::BatchingConfigured {
                    enabled: self.config.enabled,
                    batch_size: self.config.batch_size,
                    batch_interval_ms: self.config.batch_interval_ms,
                })
            }
            Err(_) => None,
        }
    }
}
