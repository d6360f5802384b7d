//! Run lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the scheduler and the
//! per-module runner.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Scheduler` (bucket events), the module runner (module
//!   lifecycle and fatal events), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the scheduler's subscriber listener, which fans events
//!   out to the `SubscriberSet`.
//!
//! See `core/mod.rs` for the system-level wiring diagram.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
