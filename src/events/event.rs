//! # Run lifecycle events emitted by the scheduler and module runner.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Bucket events**: priority-group progress (started, completed)
//! - **Module events**: per-module execution flow (starting, skipped, completed, failed)
//! - **Control events**: aggregate-fatal requests
//! - **Subscriber diagnostics**: delivery trouble in the observer layer itself
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the
//! module name, the priority group, result messages, and error strings.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. This guarantees that events can be ordered correctly even
//! when delivered out-of-order through async channels.
//!
//! ## Event flow examples
//!
//! ### Module that runs
//! ```text
//! BucketStarted
//!   → ModuleStarting
//!   → ModuleCompleted (or ModuleFailed)
//!   → BucketCompleted
//! ```
//!
//! ### Module suppressed by history
//! ```text
//! BucketStarted
//!   → ModuleSkipped
//!   → BucketCompleted
//! ```
//!
//! ### Fatal escalation
//! ```text
//! ModuleFailed
//!   → FatalRequested      (module had fatal_on_error set)
//!   → BucketCompleted     (siblings still run to completion)
//!   → [no further buckets]
//! ```
//!
//! ## Example
//! ```rust
//! use initvisor::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::ModuleFailed)
//!     .with_module("set-hostname")
//!     .with_group(2)
//!     .with_error("boom");
//!
//! assert_eq!(ev.kind, EventKind::ModuleFailed);
//! assert_eq!(ev.module.as_deref(), Some("set-hostname"));
//! assert_eq!(ev.error.as_deref(), Some("boom"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of run lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Bucket events ===
    /// A priority group is about to be processed.
    BucketStarted,
    /// Every module task in the priority group has joined.
    BucketCompleted,

    // === Module lifecycle events ===
    /// Module passed its run-type gate and is starting execution.
    ModuleStarting,
    /// Module was suppressed by its run-type gate; success propagates to history.
    ModuleSkipped,
    /// Module finished without error.
    ModuleCompleted,
    /// Module returned an error.
    ModuleFailed,

    // === Control events ===
    /// A failed module with `fatal_on_error` requested early termination.
    ///
    /// The scheduler acts on this only after the current bucket's join.
    FatalRequested,

    // === Subscriber diagnostics ===
    /// One subscriber missed an event (its queue was full or its worker
    /// gone). The gap is in that subscriber's view only; the run and the
    /// remaining subscribers are unaffected.
    SubscriberDropped,
    /// A subscriber panicked while handling an event. The panic was
    /// contained; its worker keeps draining.
    SubscriberPanicked,
}

impl EventKind {
    /// True for the subscriber-diagnostic kinds.
    ///
    /// Diagnostics about diagnostics are never generated, so a saturated
    /// subscriber cannot feed its own drop reports.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            EventKind::SubscriberDropped | EventKind::SubscriberPanicked
        )
    }
}

/// Run lifecycle event with optional metadata.
///
/// Carries information about buckets, modules, result messages, and errors.
///
/// ## Fields
///
/// - `seq`: Unique sequence number for ordering (monotonically increasing)
/// - `at`: Wall-clock timestamp (may go backwards due to NTP, use for logging only)
/// - `kind`: Event classification
/// - `module`, `group`, `message`, `error`: Optional metadata
/// - `subscriber`: Which subscriber a diagnostic concerns
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (use for logging only).
    pub at: SystemTime,
    /// One-based priority group, if applicable.
    pub group: Option<u32>,
    /// Result message reported by a module, if any.
    pub message: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Name of the module, if applicable.
    pub module: Option<String>,
    /// Name of the subscriber a diagnostic event concerns.
    pub subscriber: Option<String>,
    /// The kind of event.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            at: SystemTime::now(),
            group: None,
            message: None,
            error: None,
            module: None,
            subscriber: None,
        }
    }

    /// Attaches a module name.
    pub fn with_module(mut self, name: impl Into<String>) -> Self {
        self.module = Some(name.into());
        self
    }

    /// Attaches a one-based priority group.
    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    /// Attaches a result message.
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a subscriber name.
    pub fn with_subscriber(mut self, name: impl Into<String>) -> Self {
        self.subscriber = Some(name.into());
        self
    }

    /// Builds the diagnostic for an event that never reached `subscriber`.
    pub fn subscriber_dropped(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberDropped)
            .with_subscriber(subscriber)
            .with_error(reason)
    }

    /// Builds the diagnostic for a panic inside `subscriber`'s handler.
    pub fn subscriber_panicked(subscriber: &'static str, info: impl Into<String>) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_subscriber(subscriber)
            .with_error(info)
    }
}
