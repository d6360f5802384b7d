//! # Run a single module through its gate and action.
//!
//! This helper drives one module of a bucket: gate check, dispatch, success
//! accounting, and lifecycle [`Event`]s to the [`Bus`].
//!
//! # High-level flow:
//!
//! ```text
//!   ┌────────────┐
//!   │   Module   │
//!   └──────┬─────┘
//!      run_module()
//!          ▼
//!  should_run? ──false──► success=true, ModuleSkipped
//!          │true
//!          ▼
//!  kind.run(ctx) ──Ok──► success=true, ModuleCompleted
//!          │Err (or panic)
//!          ▼
//!  ModuleFailed ──fatal_on_error──► sentinel=name, FatalRequested
//! ```
//!
//! - A skipped module propagates `success=true` so its history key stays
//!   "done" on the next boot.
//! - A panic inside an action is caught and handled as a failure; the
//!   sibling tasks and the bucket join are unaffected.
//! - The fatal sentinel is last-writer-wins when several siblings fail
//!   fatally in one bucket.

use std::sync::{Arc, Mutex};

use futures::FutureExt;

use crate::events::{Bus, Event, EventKind};
use crate::history::InstanceHistory;
use crate::modules::{Module, ModuleContext};

/// Executes one module task and returns the module with its outcome.
///
/// Never panics and never errors: every outcome is encoded in the module's
/// success flag, the fatal sentinel, and the published events.
pub(crate) async fn run_module(
    mut module: Module,
    ctx: Arc<ModuleContext>,
    instance_id: Arc<str>,
    history: Arc<Vec<InstanceHistory>>,
    bus: Bus,
    fatal: Arc<Mutex<Option<String>>>,
) -> Module {
    if !module.should_run(&instance_id, &history) {
        // Not running means the module already succeeded in a prior run;
        // pass that success through to the history written at end-of-run.
        module.success = true;
        bus.publish(
            Event::now(EventKind::ModuleSkipped)
                .with_module(&module.name)
                .with_group(module.priority),
        );
        return module;
    }

    bus.publish(
        Event::now(EventKind::ModuleStarting)
            .with_module(&module.name)
            .with_group(module.priority),
    );

    let outcome = std::panic::AssertUnwindSafe(module.kind.run(&ctx))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(message)) => {
            module.success = true;
            bus.publish(
                Event::now(EventKind::ModuleCompleted)
                    .with_module(&module.name)
                    .with_group(module.priority)
                    .with_message(message),
            );
        }
        Ok(Err(error)) => {
            publish_failure(&bus, &module, &fatal, error.to_string());
        }
        Err(panic_err) => {
            publish_failure(&bus, &module, &fatal, format!("action panicked: {panic_err:?}"));
        }
    }

    module
}

fn publish_failure(bus: &Bus, module: &Module, fatal: &Mutex<Option<String>>, error: String) {
    bus.publish(
        Event::now(EventKind::ModuleFailed)
            .with_module(&module.name)
            .with_group(module.priority)
            .with_error(error),
    );
    if module.fatal_on_error {
        *fatal.lock().expect("fatal sentinel lock") = Some(module.name.clone());
        bus.publish(Event::now(EventKind::FatalRequested).with_module(&module.name));
    }
}
