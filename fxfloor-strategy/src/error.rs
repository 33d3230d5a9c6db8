use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines all possible strategy errors.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum StrategyError {
    #[error("unknown strategy type: {0}")]
    UnknownStrategyType(String),

    #[error("invalid config: missing or invalid '{field}'")]
    InvalidConfigField { field: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("corrupt strategy state: {0}")]
    CorruptState(String),
}

impl StrategyError {
    pub fn field(name: impl Into<String>) -> Self {
        Self::InvalidConfigField { field: name.into() }
    }
}
