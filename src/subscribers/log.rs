//! # Logging subscriber backed by `tracing`.
//!
//! [`LogWriter`] renders run lifecycle events as structured log lines. It is
//! the default subscriber installed by the CLI; headless embedders can swap
//! it for their own [`Subscribe`] implementation.
//!
//! ## Output format
//! ```text
//! INFO processing priority group group=1 modules=2
//! INFO running module module=set-hostname group=1
//! INFO module completed module=set-hostname group=1 message="..."
//! WARN module failed module=ping-gateway group=2 error="..."
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Structured logging subscriber.
///
/// Forwards every event to the `tracing` macros at a severity matching the
/// event kind. Module failures log at WARN; the run-level consequence (fatal
/// or not) is decided and logged by the scheduler, not here.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::BucketStarted => {
                tracing::info!(group = e.group, message = e.message.as_deref(), "processing priority group");
            }
            EventKind::BucketCompleted => {
                tracing::info!(group = e.group, "completed priority group");
            }
            EventKind::ModuleStarting => {
                tracing::info!(module = e.module.as_deref(), group = e.group, "running module");
            }
            EventKind::ModuleSkipped => {
                tracing::info!(
                    module = e.module.as_deref(),
                    group = e.group,
                    "skipping module due to run type setting"
                );
            }
            EventKind::ModuleCompleted => {
                tracing::info!(
                    module = e.module.as_deref(),
                    group = e.group,
                    message = e.message.as_deref(),
                    "module completed"
                );
            }
            EventKind::ModuleFailed => {
                tracing::warn!(
                    module = e.module.as_deref(),
                    group = e.group,
                    message = e.message.as_deref(),
                    error = e.error.as_deref(),
                    "module failed"
                );
            }
            EventKind::FatalRequested => {
                tracing::warn!(module = e.module.as_deref(), "module failure marked fatal");
            }
            EventKind::SubscriberDropped => {
                tracing::warn!(
                    subscriber = e.subscriber.as_deref(),
                    reason = e.error.as_deref(),
                    "a subscriber missed an event"
                );
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(
                    subscriber = e.subscriber.as_deref(),
                    panic = e.error.as_deref(),
                    "a subscriber panicked while handling an event"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
