//! Shared context handed to every module action.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::imds::Imds;

/// Per-run facilities a module action may use.
///
/// Cheap to clone; one is built per run and shared by every bucket task.
#[derive(Clone)]
pub struct ModuleContext {
    /// Metadata service handle (user data, public keys).
    pub imds: Arc<dyn Imds>,
    /// On-disk history directory of the current instance. Exists before the
    /// first bucket runs; modules may persist artifacts here.
    pub instance_history_dir: PathBuf,
}

impl ModuleContext {
    /// Creates a context for one run.
    pub fn new(imds: Arc<dyn Imds>, instance_history_dir: impl Into<PathBuf>) -> Self {
        Self {
            imds,
            instance_history_dir: instance_history_dir.into(),
        }
    }

    /// Returns the current instance's history directory.
    pub fn instance_history_path(&self) -> &Path {
        &self.instance_history_dir
    }
}
