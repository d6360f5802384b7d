//! # Persisted run history records.
//!
//! One [`InstanceHistory`] is written per `(instance, boot)` pair; later
//! boots of the same instance overwrite the previous record. Each entry in
//! `moduleHistory` pairs a module's deterministic history key with whether
//! that invocation succeeded (or was skipped as already-done, which also
//! counts as success).
//!
//! ## Wire format
//! ```json
//! {
//!   "instanceID": "i-00000000000000001",
//!   "runTime": "2024-06-01T12:00:09.375Z",
//!   "moduleHistory": [ {"key": "1_RunPerInstance_command_A", "success": true} ],
//!   "version": 1
//! }
//! ```
//!
//! ## Schema evolution
//! `version` is reserved. Readers accept unknown values and treat missing
//! fields as empty; the writer always stamps the current version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version stamped into every written history file.
pub const HISTORY_VERSION: u32 = 1;

/// Result of one module invocation, keyed for cross-boot identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Deterministic key: `<priority>_<runType>_<typeTag>_<name>`.
    #[serde(default)]
    pub key: String,
    /// Whether the invocation succeeded (skipped-as-done propagates true).
    #[serde(default)]
    pub success: bool,
}

/// Full history of one boot of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHistory {
    /// Identity of the instance this record belongs to.
    #[serde(rename = "instanceID", default)]
    pub instance_id: String,
    /// Wall-clock time the history was written (RFC 3339).
    #[serde(rename = "runTime", default = "epoch")]
    pub run_time: DateTime<Utc>,
    /// One record per module in the run plan, in plan order.
    #[serde(rename = "moduleHistory", default)]
    pub module_history: Vec<ModuleRecord>,
    /// Schema version; unknown values are accepted on read.
    #[serde(default)]
    pub version: u32,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl InstanceHistory {
    /// Creates a history stamped with the current time and schema version.
    pub fn now(instance_id: impl Into<String>, module_history: Vec<ModuleRecord>) -> Self {
        Self {
            instance_id: instance_id.into(),
            run_time: Utc::now(),
            module_history,
            version: HISTORY_VERSION,
        }
    }

    /// True if this history holds a successful record under the given key.
    pub fn succeeded(&self, key: &str) -> bool {
        self.module_history
            .iter()
            .any(|r| r.key == key && r.success)
    }
}
