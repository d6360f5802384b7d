//! Run history: the persisted data model and the atomic on-disk store.
//!
//! History is what makes `RunOnce` and `RunPerInstance` idempotence work
//! across boots: the run-type gate reads it at startup, and the scheduler
//! writes a fresh record at the end of every run, whether the run ended
//! normally or broke out on an aggregate fatal.

mod record;
mod store;

pub use record::{InstanceHistory, ModuleRecord, HISTORY_VERSION};
pub use store::HistoryStore;
