use fxfloor_data::error::DataError;
use fxfloor_execution::error::ExecutionError;
use fxfloor_integration::error::KvError;
use fxfloor_strategy::error::StrategyError;
use thiserror::Error;

/// Defines all possible errors in FxFloor core.
///
/// Each variant maps to a stable error kind surfaced to API callers, with an
/// optional suggestion (eg/ `restart` vs `resume` on a stopped task).
#[derive(Debug, Error)]
pub enum FxFloorError {
    #[error("{message}")]
    Validation {
        message: String,
        suggestion: Option<String>,
    },

    #[error("not authorised: {0}")]
    Authorisation(String),

    #[error("task is already running; cannot start a concurrent execution")]
    AlreadyRunning,

    #[error("task has reached maximum retry limit (retry_count={retry_count}, max_retries={max_retries})")]
    RetryLimitExceeded { retry_count: u32, max_retries: u32 },

    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("market data: {0}")]
    Data(#[from] DataError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("kv store: {0}")]
    Kv(#[from] KvError),

    #[error("repository: {0}")]
    Repository(String),
}

impl FxFloorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FxFloorError::Validation { .. } => "validation_error",
            FxFloorError::Authorisation(_) => "authorisation_error",
            FxFloorError::AlreadyRunning => "already_running",
            FxFloorError::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            // Config/schema problems are caller errors; only a runtime failure
            // inside the strategy is a strategy error.
            FxFloorError::Strategy(StrategyError::CorruptState(_)) => "strategy_error",
            FxFloorError::Strategy(_) => "validation_error",
            FxFloorError::Data(_) => "validation_error",
            FxFloorError::Execution(ExecutionError::BrokerReject { .. }) => "broker_reject",
            FxFloorError::Execution(ExecutionError::Compliance(_)) => "compliance_violation",
            FxFloorError::Execution(_) => "transport_error",
            FxFloorError::Kv(_) => "transport_error",
            FxFloorError::Repository(_) => "transport_error",
        }
    }

    /// Human suggestion for API callers, where one exists.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            FxFloorError::Validation { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(FxFloorError::AlreadyRunning.kind(), "already_running");
        assert_eq!(
            FxFloorError::validation("bad dates").kind(),
            "validation_error"
        );
        assert_eq!(
            FxFloorError::Execution(ExecutionError::BrokerReject {
                reason: "x".into()
            })
            .kind(),
            "broker_reject"
        );
    }

    #[test]
    fn test_suggestion_round_trips() {
        let error = FxFloorError::validation_with_suggestion(
            "task is stopped",
            "use restart to clear execution data, or resume to continue",
        );
        assert!(error.suggestion().unwrap().contains("restart"));
    }
}
