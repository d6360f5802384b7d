//! # Error types used by the init pipeline and module actions.
//!
//! This module defines two main error enums:
//!
//! - [`InitError`] errors raised by the orchestration pipeline itself.
//! - [`ModuleError`] errors raised by individual module executions.
//!
//! Both types provide helper methods `as_label` for logs and diagnostics.
//! [`InitError`] additionally maps each variant to the process exit code the
//! CLI contract assigns to it via [`InitError::exit_code`].

use std::path::PathBuf;

use thiserror::Error;

use crate::imds::ImdsError;

/// # Errors produced by the init pipeline.
///
/// These represent failures in the orchestration system itself, before or
/// after module execution. Module failures are *not* represented here; they
/// stay contained in their bucket task as [`ModuleError`] and only surface
/// through the aggregate-fatal sentinel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InitError {
    /// Structural or semantic problem with the declarative plan.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// The configuration file could not be read at all.
    #[error("error reading config file at {path}: {source}")]
    ConfigRead {
        /// Location of the configuration file.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata service never yielded an instance id within the budget.
    #[error("unable to get instance ID after {attempts} attempts: {reason}")]
    IdentityUnavailable {
        /// Number of attempts performed before giving up.
        attempts: u32,
        /// Last failure observed from the metadata service.
        reason: String,
    },

    /// A history file was present but could not be decoded.
    ///
    /// Distinguished from [`InitError::HistoryIo`] so callers can quarantine
    /// corrupt records differently from transient I/O trouble.
    #[error("malformed history file at {path}: {source}")]
    HistoryMalformed {
        /// The offending history file.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A history file or directory could not be read.
    #[error("error reading history at {path}: {source}")]
    HistoryIo {
        /// The path that failed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The history file (or its directory) could not be written.
    #[error("error writing history at {path}: {reason}")]
    HistoryWrite {
        /// The write target.
        path: PathBuf,
        /// Description of the underlying failure.
        reason: String,
    },
}

impl InitError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            InitError::Config { .. } => "init_config_invalid",
            InitError::ConfigRead { .. } => "init_config_read",
            InitError::IdentityUnavailable { .. } => "init_identity_unavailable",
            InitError::HistoryMalformed { .. } => "init_history_malformed",
            InitError::HistoryIo { .. } => "init_history_io",
            InitError::HistoryWrite { .. } => "init_history_write",
        }
    }

    /// Maps the error to the exit code the CLI contract assigns to it.
    ///
    /// - invalid configuration → 65
    /// - unreadable configuration file → 66
    /// - identity probe exhaustion → 75
    /// - history write / directory creation → 73
    /// - everything else → 1 (generic fatal)
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::Config { .. } => 65,
            InitError::ConfigRead { .. } => 66,
            InitError::IdentityUnavailable { .. } => 75,
            InitError::HistoryWrite { .. } => 73,
            InitError::HistoryMalformed { .. } | InitError::HistoryIo { .. } => 1,
        }
    }
}

/// # Errors produced by module execution.
///
/// These represent failures of individual actions dispatched by the
/// scheduler. They are logged, recorded as `success=false` in history, and
/// escalate only when the failing module has `fatal_on_error` set.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ModuleError {
    /// An external command could not be started or exited unsuccessfully.
    #[error("command {command:?} failed: {reason}")]
    Command {
        /// The command line that was attempted.
        command: String,
        /// stderr excerpt or spawn failure description.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata service request failed.
    #[error(transparent)]
    Imds(#[from] ImdsError),

    /// A referenced local user does not exist.
    #[error("user '{name}' does not exist")]
    UnknownUser {
        /// The missing username.
        name: String,
    },

    /// The module's configuration is usable but an operand is malformed
    /// (e.g. a sysctl entry without `param=value` shape).
    #[error("invalid module input: {reason}")]
    Invalid {
        /// Description of the malformed operand.
        reason: String,
    },

    /// One or more sub-operations of a compound module failed.
    #[error("{reason}")]
    Partial {
        /// Summary of the failed sub-operations.
        reason: String,
    },
}

impl ModuleError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Command { .. } => "module_command_failed",
            ModuleError::Io { .. } => "module_io",
            ModuleError::Imds(_) => "module_imds",
            ModuleError::UnknownUser { .. } => "module_unknown_user",
            ModuleError::Invalid { .. } => "module_invalid_input",
            ModuleError::Partial { .. } => "module_partial_failure",
        }
    }
}
