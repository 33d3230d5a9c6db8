use crate::compliance::ComplianceViolation;
use fxfloor_integration::error::IntegrationError;
use thiserror::Error;

/// Defines all possible execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Transport-level failure (HTTP, stream). Retried with bounded backoff.
    #[error("transport: {0}")]
    Transport(String),

    /// Broker-level order rejection. Never retried.
    #[error("broker rejected order: {reason}")]
    BrokerReject { reason: String },

    /// Jurisdiction compliance violation. Never retried.
    #[error("compliance: {0}")]
    Compliance(#[from] ComplianceViolation),

    #[error("order submission failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("decoding broker payload: {0}")]
    Decode(String),
}

impl From<IntegrationError> for ExecutionError {
    fn from(error: IntegrationError) -> Self {
        match error {
            // Non-2xx broker responses carry a rejection payload, not a transport
            // fault - they must not be retried.
            IntegrationError::Response { status, body } if status < 500 => Self::BrokerReject {
                reason: format!("status {status}: {body}"),
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Errors produced by order / position repositories.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend: {0}")]
    Backend(String),
}
