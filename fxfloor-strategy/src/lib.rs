#![forbid(unsafe_code)]
#![recursion_limit = "256"]
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

//! # FxFloor-Strategy
//! FxFloor-Strategy defines the per-tick strategy contract the task and backtest
//! engines drive, the closed [`StrategyEvent`](event::StrategyEvent) vocabulary all
//! strategies emit, and the layered Floor strategy implementation.
//!
//! Strategies are deterministic: for any `(state, tick)` pair, `on_tick` returns the
//! same `(state', events)`. They perform no I/O and read no clock other than
//! `tick.time`; all side effects are realised by downstream handlers consuming the
//! emitted events.

use crate::{error::StrategyError, event::StrategyEvent};
use fxfloor_data::Tick;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Account currency conversion helpers.
pub mod convert;

/// Defines all possible strategy errors.
pub mod error;

/// Closed set of strategy event value objects with tagged-union decoding.
pub mod event;

/// Layered Floor strategy - config, state, candles and the per-tick algorithm.
pub mod floor;

/// Deterministic window indicators over mid-price history.
///
/// ie/ SMA, EMA, RSI.
pub mod indicators;

/// Registry of available strategies keyed by strategy type.
pub mod registry;

/// Parameter schema validation for strategy configurations.
pub mod schema;

/// Regulatory disposition of simultaneous long/short exposure.
///
/// Netting jurisdictions (eg/ US) force FIFO close ordering; hedging jurisdictions
/// allow LIFO / independent closes.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Hedging,
    Netting,
}

/// Output of one strategy transition - the successor state, the events produced, and
/// an optional cooperative stop request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyResult {
    pub state: Value,
    pub events: Vec<StrategyEvent>,
    pub should_stop: bool,
    pub stop_reason: Option<String>,
}

impl StrategyResult {
    pub fn new(state: Value, events: Vec<StrategyEvent>) -> Self {
        Self {
            state,
            events,
            should_stop: false,
            stop_reason: None,
        }
    }

    pub fn with_stop(mut self, reason: impl Into<String>) -> Self {
        self.should_stop = true;
        self.stop_reason = Some(reason.into());
        self
    }
}

/// Per-tick strategy contract.
///
/// The state is opaque to the engine - a JSON document checkpointed back to the task
/// record after every transition - and is shaped entirely by the strategy.
pub trait Strategy: Send + Sync + Debug {
    /// Process one tick against the provided state.
    fn on_tick(&self, tick: &Tick, state: Value) -> Result<StrategyResult, StrategyError>;

    /// Lifecycle hook invoked when a run starts.
    fn on_start(&self, state: Value) -> Result<StrategyResult, StrategyError>;

    /// Lifecycle hook invoked when a run is paused.
    fn on_pause(&self, state: Value) -> Result<StrategyResult, StrategyError>;

    /// Lifecycle hook invoked when a paused run resumes.
    fn on_resume(&self, state: Value) -> Result<StrategyResult, StrategyError>;

    /// Lifecycle hook invoked when a run stops.
    fn on_stop(&self, state: Value) -> Result<StrategyResult, StrategyError>;
}
