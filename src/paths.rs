//! Well-known filesystem locations and path builders.
//!
//! Everything the pipeline touches on disk hangs off a single base
//! directory so tests and embedders can relocate the whole tree.

use std::path::{Path, PathBuf};

/// Root directory under which configuration and history live by default.
pub const DEFAULT_BASE_DIR: &str = "/usr/local/initvisor";

/// Filename of the declarative boot configuration.
pub const INIT_TOML: &str = "init.toml";

/// Filename of the per-instance persisted history state.
pub const HISTORY_JSON: &str = "history.json";

/// Crash-loop counter file. Lives in a reboot-volatile location so the
/// per-boot fatal budget resets on restart.
pub const FATAL_COUNT_FILE: &str = "/tmp/.initvisor-fatal-counts.json";

/// Name of the directory under which history files are stored.
const INSTANCES_DIRNAME: &str = "instances";

/// Returns the path of the boot configuration file.
pub fn init_config(base: &Path) -> PathBuf {
    base.join(INIT_TOML)
}

/// Returns the path where all instances' history is, relative to the given
/// base directory.
pub fn all_instances_history(base: &Path) -> PathBuf {
    base.join(INSTANCES_DIRNAME)
}

/// Returns the history directory of the *specified* instance.
pub fn instance_history(base: &Path, instance_id: &str) -> PathBuf {
    base.join(INSTANCES_DIRNAME).join(instance_id)
}
