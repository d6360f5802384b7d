//! Run core: orchestration and the per-boot fatal budget.
//!
//! This module contains the execution engine the CLI wires together. The
//! public API re-exported from here is [`Scheduler`], [`RunOutcome`],
//! [`FatalGuard`], and the fatal limit; the runner is an internal building
//! block.
//!
//! ## Files & responsibilities
//! - **scheduler.rs**: public facade; owns the run pipeline (Bus,
//!   SubscriberSet), drives buckets in priority order with a join barrier
//!   per bucket, breaks out on the aggregate-fatal sentinel, closes and
//!   drains the event pipeline at end of run.
//! - **runner.rs**: one module task: run-type gate, dispatch via the tagged
//!   kind, success accounting, panic shielding, fatal sentinel writes,
//!   lifecycle events.
//! - **fatal.rs**: crash-loop guard; caps per-boot fatal exits so the host
//!   service manager cannot restart the process forever.
//!
//! ## Event data-plane (who publishes & who consumes)
//!
//! Producers (publish to Bus):
//! - **Scheduler** → `BucketStarted{group}`, `BucketCompleted{group}`
//! - **runner**    → `ModuleStarting`, `ModuleSkipped`, `ModuleCompleted{message}`,
//!   `ModuleFailed{error}`, `FatalRequested{module}`
//!
//! Consumers (subscribe to Bus):
//! - **Scheduler's subscriber listener** (single fan-out point) → emits to
//!   **SubscriberSet** (per-subscriber mpsc queues)
//!
//! ## Wiring (module-level flow)
//! ```text
//! CLI `run`
//!   ├─ probe instance id (imds::acquire_instance_id)
//!   ├─ load + validate config → RunPlan
//!   ├─ HistoryStore::ensure_instance_dir / read_all
//!   └─ Scheduler::run(plan, id, history)
//!
//! Scheduler::run()
//!   ├─ spawn subscriber_listener()        (Bus → SubscriberSet)
//!   └─ for each bucket, ascending priority:
//!        ├─ publish BucketStarted
//!        ├─ JoinSet: spawn run_module() per module
//!        │    run_module:
//!        │      gate false → success=true, ModuleSkipped
//!        │      gate true  → ModuleStarting, dispatch kind.run(ctx)
//!        │         Ok  → success=true, ModuleCompleted
//!        │         Err → ModuleFailed; fatal_on_error → sentinel, FatalRequested
//!        ├─ join ALL tasks (barrier)
//!        ├─ publish BucketCompleted
//!        └─ sentinel set? → break
//!
//! CLI `run` (continued)
//!   ├─ HistoryStore::write(InstanceHistory from plan.records())   (always)
//!   └─ sentinel set? → exit FatalGuard::filter_exit_code(1)
//! ```
//!
//! ## Rules
//! - No cancellation inside a bucket: every spawned task runs to
//!   completion, even when a sibling fails fatally.
//! - All side effects of bucket *i* happen-before any start of bucket
//!   *i+1* (the join barrier).
//! - History is written on every exit path where the scheduler ran at all;
//!   that write is the caller's last step, not the scheduler's.
//! - Any nonzero exit is filtered through the [`FatalGuard`].

mod fatal;
mod runner;
mod scheduler;

pub use fatal::{FatalGuard, PER_BOOT_FATAL_LIMIT};
pub use scheduler::{RunOutcome, Scheduler};
