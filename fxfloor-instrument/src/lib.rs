#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # FxFloor-Instrument
//! FxFloor-Instrument contains the core Instrument, pip and direction data structures
//! shared across the FxFloor trading system.
//!
//! All monetary and quantity fields are [`rust_decimal::Decimal`] - floating point is
//! never used for prices.

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// [`Instrument`](instrument::Instrument) related data structures.
///
/// eg/ `InstrumentSymbol`, pip size utilities, etc.
pub mod instrument;

pub use instrument::{Instrument, InstrumentSymbol};

/// [`Side`] of a trade or order - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}

/// [`Direction`] of a position - Long or Short.
///
/// Distinct from [`Side`]: opening a Short position is a Sell order, but closing it
/// is a Buy order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "LONG")]
    Long,
    #[serde(alias = "SHORT")]
    Short,
}

impl Direction {
    /// Opposite [`Direction`], used when opening hedge (mirror) positions.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// [`Side`] of the order that opens a position in this [`Direction`].
    pub fn open_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// [`Side`] of the order that closes a position in this [`Direction`].
    pub fn close_side(&self) -> Side {
        self.opposite().open_side()
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Direction::Long => "long",
                Direction::Short => "short",
            }
        )
    }
}

/// A keyed value.
///
/// eg/ Keyed<InstrumentSymbol, Instrument>
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Keyed<Key, Value> {
    pub key: Key,
    pub value: Value,
}

impl<Key, Value> AsRef<Value> for Keyed<Key, Value> {
    fn as_ref(&self) -> &Value {
        &self.value
    }
}

pub mod test_utils {
    use crate::instrument::Instrument;

    pub fn instrument(symbol: &str) -> Instrument {
        Instrument::forex(symbol)
    }
}
