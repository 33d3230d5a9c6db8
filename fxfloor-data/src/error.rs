use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines all possible market data errors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("invalid tick: bid {bid} > ask {ask}")]
    InvalidSpread { bid: Decimal, ask: Decimal },

    #[error("invalid tick: mid {mid} outside [{bid}, {ask}]")]
    MidOutsideSpread {
        bid: Decimal,
        mid: Decimal,
        ask: Decimal,
    },

    #[error("no historical data available for the specified period")]
    HistoryEmpty,

    #[error("historical range inverted: start {start} >= end {end}")]
    RangeInverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("pricing feed: {0}")]
    Feed(String),

    #[error("pricing feed terminated after {attempts} reconnect attempts: {reason}")]
    ReconnectsExhausted { attempts: usize, reason: String },
}
