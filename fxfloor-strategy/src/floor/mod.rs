//! Layered Floor strategy.
//!
//! Floor maintains up to `max_layers` layers of same-direction entries. Each layer
//! scales in when price moves adversely by its retracement trigger; exhausting the
//! layer's retracements pushes a new layer (recording the old one on a return stack
//! for resumption after take-profit). Volatility regime detection can lock the
//! strategy - closing everything, or hedge-neutralizing exposure with mirror
//! entries - and margin protection force-closes the oldest entries when the margin
//! ratio breaches its start threshold.

/// Candle aggregation and ATR estimation.
pub mod candle;

/// Floor configuration, parameter progressions and the declared parameter schema.
pub mod config;

/// Floor strategy state - layers, open entries, volatility and margin bookkeeping.
pub mod state;

/// The per-tick Floor algorithm.
pub mod strategy;

pub use config::{DirectionMethod, FloorConfig, Progression, RetracementLotMode};
pub use state::{FloorState, OpenEntry, StrategyStatus};
pub use strategy::FloorStrategy;

/// Strategy type identifier under which Floor is registered.
pub const FLOOR_STRATEGY_TYPE: &str = "floor";
