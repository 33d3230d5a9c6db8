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

//! # FxFloor
//! FxFloor is an automated foreign-exchange trading platform. Authenticated users
//! configure parameterised trading strategies, attach them to a brokerage account
//! or a historical-data backtest, and run them concurrently and reproducibly.
//!
//! This core crate ties the ecosystem together:
//! * Task lifecycle state machine with at-most-one execution per task and per
//!   brokerage account, enforced by distributed locks with heartbeats
//!   ([`lock::TaskLockManager`]).
//! * Task execution driver for trading and backtest runs ([`engine::TaskExecutor`]).
//! * Historical backtest engine with trade log, equity curve and performance
//!   statistics ([`backtest`], [`statistic`]).
//! * Realtime WebSocket fan-out with per-client batching ([`realtime`]).

/// Historical backtest engine.
pub mod backtest;

/// System configuration surface.
pub mod config;

/// Task executor and lifecycle driver.
pub mod engine;

/// Defines all possible errors in FxFloor core.
pub mod error;

/// Distributed task lock manager with heartbeats and a stale-lock sweeper.
pub mod lock;

/// Provides default FxFloor Tracing logging initialisers.
pub mod logging;

/// Realtime WebSocket fan-out with per-client batching and demo streams.
pub mod realtime;

/// Statistical algorithms for analysing backtest results.
///
/// eg/ `PerformanceMetrics`, `SharpeRatio`, `MaxDrawdown`, etc.
pub mod statistic;

/// Task data model, state machine and repositories.
pub mod task;
