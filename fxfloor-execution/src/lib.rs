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

//! # FxFloor-Execution
//! FxFloor-Execution contains the broker-facing half of the FxFloor trading system:
//! * [`BrokerClient`](client::BrokerClient) abstraction with an OANDA v20
//!   implementation and a mock for testing.
//! * [`OrderExecutor`](executor::OrderExecutor) - market / limit / stop / OCO order
//!   submission with bounded retry, jurisdiction compliance gating and
//!   position-differentiation unit adjustment.
//! * [`TransactionStreamer`](stream::TransactionStreamer) - realtime broker
//!   transaction consumption with exponential-backoff reconnection.
//! * Order and position [reconcilers](reconcile) that heal divergence between local
//!   state and broker state.

/// Brokerage account model.
pub mod account;

/// Broker client abstraction and implementations.
pub mod client;

/// Jurisdiction compliance rules applied before order submission.
pub mod compliance;

/// Position-differentiation policy rewriting order units to avoid size collisions.
pub mod differentiation;

/// Defines all possible execution errors.
pub mod error;

/// Order submission with retries, compliance gating and audit events.
pub mod executor;

/// Order data model.
pub mod order;

/// Live position data model.
pub mod position;

/// Periodic order / position reconciliation against the broker.
pub mod reconcile;

/// Order and position repositories.
pub mod repository;

/// Realtime broker transaction stream consumer.
pub mod stream;
