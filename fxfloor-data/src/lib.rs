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

//! # FxFloor-Data
//! FxFloor-Data contains the [`Tick`](tick::Tick) data model and the tick stream
//! sources the trading engine consumes:
//! * Finite, lazily consumed historical tick sequences for backtests.
//! * Infinite live pricing streams with automatic reconnection and exponential
//!   backoff.
//! * A synthetic demo tick generator (bounded random walk) so the realtime layer is
//!   usable before any brokerage account is onboarded.

/// Defines all possible market data errors.
pub mod error;

/// Finite historical tick sequences and the loader abstraction backtests pull from.
pub mod historical;

/// Live pricing feed abstraction and reconnecting live tick stream initialisation.
pub mod live;

/// Synthetic demo tick generation (random walk with bounded drift).
pub mod demo;

/// Utilities for continually reconnecting streams with exponential backoff.
pub mod reconnect;

/// Tick data model.
pub mod tick;

pub use tick::Tick;
