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

//! # FxFloor-Integration
//! FxFloor-Integration contains the low-level plumbing shared by the FxFloor trading
//! system components:
//! * [`KvStore`](kv::KvStore) abstraction over a shared key-value store with atomic
//!   conditional writes, TTLs and cursor-based scans (Redis in production, in-memory
//!   in tests).
//! * Append-only audit [`Event`](event::Event) model and [`EventSink`](event::EventSink).
//! * Unbounded channel utilities used to wire cooperative tasks together.
//! * A minimal authenticated REST client for broker HTTP APIs.

/// Unbounded channel utilities.
///
/// ie/ `Tx`, `Channel`, `UnboundedTx` & `UnboundedRx`.
pub mod channel;

/// Defines all possible integration errors.
pub mod error;

/// Append-only audit event model and sink abstraction.
pub mod event;

/// Key-value store abstraction with atomic conditional-set, TTLs, cursor-based SCAN
/// and pub/sub. Backed by Redis in production and an in-memory map in tests.
pub mod kv;

/// Minimal authenticated REST client plumbing for broker HTTP APIs.
pub mod protocol;

/// [`Terminal`] types are sent to indicate a process should end.
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}

/// [`Unrecoverable`] errors are fatal and cannot be retried.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}
