//! The [`Subscribe`] trait — how external code watches a run.
//!
//! Anything that wants a view of the pipeline, such as the CLI's log
//! writer, a metrics exporter, or an audit trail, implements this trait
//! and is handed to the scheduler at construction. The contract is
//! deliberately loose on the publishing side: the scheduler emits an event
//! and moves on, and each subscriber drains a bounded queue of its own on
//! a dedicated worker task. A subscriber that falls behind fills only its
//! own queue; further events for it are then dropped (and the drop
//! reported, see [`SubscriberSet`](crate::subscribers::SubscriberSet)),
//! while the run and every other subscriber proceed at full speed.
//!
//! The same isolation applies to crashes. A panic inside [`Subscribe::on_event`]
//! is caught, logged, and reported to the remaining subscribers; the
//! panicking subscriber's worker then resumes with the next event.

use async_trait::async_trait;

use crate::events::Event;

/// An observer of run lifecycle events.
///
/// Events arrive one at a time, in publish order, on a worker task owned
/// by the fan-out layer, never on the scheduler's own task. Handlers
/// should finish quickly or at least only at their own expense; the worst
/// a slow handler can do is overflow its own queue and lose events from
/// its own view.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    ///
    /// Taking long here delays only this subscriber's queue. Errors have
    /// nowhere to go, so handle them internally; a panic is contained and
    /// reported rather than propagated.
    async fn on_event(&self, event: &Event);

    /// A short identifier for drop and panic diagnostics ("log",
    /// "metrics", "audit").
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// How many undelivered events this subscriber is willing to buffer
    /// before further ones are dropped for it.
    ///
    /// The default of 1024 comfortably covers a full boot; shrink it for
    /// subscribers that would rather lose events than hold memory.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
