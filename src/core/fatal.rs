//! # Crash-loop guard.
//!
//! The host service manager restarts this process whenever it exits
//! nonzero. A persistent early-boot failure (disk full, corrupt history)
//! would therefore restart it forever. The guard caps that: a small JSON
//! counter in a reboot-volatile location tracks how many fatal exits this
//! boot has produced, and once the cap is exceeded every further requested
//! nonzero exit code is replaced with 0.
//!
//! The counter file is cleared externally by reboot, never by this process.
//! Errors reading or writing the counter are logged but never themselves
//! abort the run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::paths;

/// Number of runs resulting in fatal exits in a single boot before giving up.
pub const PER_BOOT_FATAL_LIMIT: u64 = 100;

/// On-disk shape of the counter file.
#[derive(Debug, Serialize, Deserialize)]
struct FatalCount {
    count: u64,
}

/// Per-boot fatal exit budget, persisted across process restarts.
pub struct FatalGuard {
    path: PathBuf,
    limit: u64,
}

impl FatalGuard {
    /// Creates a guard over the given counter file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: PER_BOOT_FATAL_LIMIT,
        }
    }

    /// Creates a guard at the conventional reboot-volatile location.
    pub fn at_default_location() -> Self {
        Self::new(paths::FATAL_COUNT_FILE)
    }

    /// Filters an exit code requested by another component.
    ///
    /// - Counter over the limit: logs and returns **0** so the service
    ///   manager stops restarting the process.
    /// - Otherwise: increments and persists the counter and returns the
    ///   requested code unchanged.
    ///
    /// Counter I/O trouble is logged and the requested code passes through.
    pub fn filter_exit_code(&self, requested: i32) -> i32 {
        let count = match self.read_count() {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "error while getting retry information");
                return requested;
            }
        };

        if count > self.limit {
            tracing::error!(
                count,
                limit = self.limit,
                "number of fatal retries exceeded, exiting 0 to avoid infinite runs"
            );
            return 0;
        }

        tracing::info!(count, limit = self.limit, "fatal exit of this boot");
        if let Err(e) = self.write_count(count + 1) {
            tracing::error!(error = %e, "unable to write fatal counts to file");
        }

        requested
    }

    /// Reads the current count; an absent file means this is the first
    /// fatal of the boot.
    fn read_count(&self) -> Result<u64, String> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(format!("failed to read {}: {e}", self.path.display())),
        };
        let decoded: FatalCount = serde_json::from_slice(&bytes)
            .map_err(|e| format!("failed to parse {}: {e}", self.path.display()))?;
        Ok(decoded.count)
    }

    fn write_count(&self, count: u64) -> Result<(), String> {
        let bytes = serde_json::to_vec(&FatalCount { count })
            .map_err(|e| format!("failed to encode fatal counts: {e}"))?;
        std::fs::write(&self.path, bytes)
            .map_err(|e| format!("failed to save {}: {e}", self.path.display()))
    }
}
