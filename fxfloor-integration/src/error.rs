use crate::Unrecoverable;
use thiserror::Error;

/// Defines all possible errors produced by the integration layer.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("kv store: {0}")]
    Kv(#[from] KvError),

    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http response status {status}: {body}")]
    Response { status: u16, body: String },

    #[error("deserialising payload: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("url: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors produced by a [`KvStore`](crate::kv::KvStore) implementation.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialising kv payload: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Unrecoverable for IntegrationError {
    fn is_unrecoverable(&self) -> bool {
        matches!(self, IntegrationError::Url(_))
    }
}
