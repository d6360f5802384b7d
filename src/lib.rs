//! # initvisor
//!
//! **Initvisor** is a boot-time initialization supervisor for cloud-hosted
//! macOS instances.
//!
//! On every boot it reads a declarative TOML plan, asks the instance
//! metadata service (IMDS) who it is, runs the configured modules in
//! priority groups, and persists a compact history of what succeeded so
//! later boots can skip work that must not recur.
//!
//! ## Features
//!
//! | Area              | Description                                                        | Key types / traits                  |
//! |-------------------|--------------------------------------------------------------------|-------------------------------------|
//! | **Scheduling**    | Priority buckets, concurrent within, join barrier between.         | [`Scheduler`], [`RunPlan`]          |
//! | **Idempotence**   | Per-module run-type gate against persisted history.                | [`RunType`], [`Module`]             |
//! | **History**       | Atomic per-instance JSON records.                                  | [`HistoryStore`], [`InstanceHistory`] |
//! | **Modules**       | Seven built-in actions behind one async trait.                     | [`ModuleKind`], [`ModuleAction`]    |
//! | **Identity**      | Token-gated metadata lookups with a bounded boot-time probe.       | [`Imds`], [`HttpImds`], [`ProbePolicy`] |
//! | **Observability** | Lifecycle events fanned out to isolated subscribers.               | [`Event`], [`Subscribe`], [`LogWriter`] |
//! | **Crash-loop**    | Per-boot fatal budget replacing runaway exits with 0.              | [`FatalGuard`]                      |
//! | **Errors**        | Typed errors with stable labels and CLI exit codes.                | [`InitError`], [`ModuleError`]      |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use initvisor::{
//!     acquire_instance_id, load_config, paths, HistoryStore, HttpImds, InstanceHistory,
//!     LogWriter, ModuleContext, ProbePolicy, RunPlan, Scheduler, Subscribe,
//! };
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = Path::new(paths::DEFAULT_BASE_DIR);
//!     let imds = Arc::new(HttpImds::new());
//!
//!     let id = acquire_instance_id(
//!         imds.as_ref(),
//!         &ProbePolicy::default(),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     let plan = RunPlan::from_modules(load_config(&paths::init_config(base))?);
//!     let store = HistoryStore::new(paths::all_instances_history(base), paths::HISTORY_JSON);
//!     let instance_dir = store.ensure_instance_dir(&id)?;
//!     let history = store.read_all()?;
//!
//!     let ctx = ModuleContext::new(imds, instance_dir);
//!     let scheduler = Scheduler::new(ctx, vec![Arc::new(LogWriter) as Arc<dyn Subscribe>]);
//!     let outcome = scheduler.run(plan, &id, history).await;
//!
//!     store.write(&InstanceHistory::now(&id, outcome.plan.records()))?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod events;
mod history;
mod imds;
mod modules;
mod subscribers;

pub mod core;
pub mod paths;
pub mod util;

// ---- Public re-exports ----

pub use config::{load_config, validate_all, InitToml, ModuleDecl, RunPlan};
pub use crate::core::{FatalGuard, RunOutcome, Scheduler, PER_BOOT_FATAL_LIMIT};
pub use error::{InitError, ModuleError};
pub use events::{Bus, Event, EventKind};
pub use history::{HistoryStore, InstanceHistory, ModuleRecord, HISTORY_VERSION};
pub use imds::{
    acquire_instance_id, HttpImds, Imds, ImdsError, ProbePolicy, IMDS_BASE, INSTANCE_ID_ENDPOINT,
};
pub use modules::{
    CommandModule, ModifyDefaults, ModifySysctl, Module, ModuleAction, ModuleContext, ModuleKind,
    MotdModule, NetworkCheckModule, RunType, SshKeysModule, SystemConfigModule, UserDataModule,
    UserManagementModule,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
