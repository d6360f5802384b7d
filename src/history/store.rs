//! # On-disk history store.
//!
//! One subdirectory per instance under a base path, each holding a single
//! history file:
//!
//! ```text
//! <base>/instances/
//!   i-00000000000000001/history.json
//!   i-00000000000000002/history.json
//! ```
//!
//! ## Read path
//! Enumerate immediate subdirectories; decode the history file when it
//! exists, is a regular file, and is non-empty. Empty or irregular files are
//! skipped with a warning. Decode failures surface as a distinguishable
//! "malformed" error kind, separate from I/O errors. A missing base
//! directory reads as empty history.
//!
//! ## Write path
//! The per-instance directory is created (0755) if absent. Bytes go to a
//! temp file in the *same* directory, are flushed and synced, then renamed
//! over the final path, so a reader observes either the prior contents or
//! the new contents in full — never a torn or zero-byte file. On any error
//! the temp file is removed.

use std::fs;
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::InitError;
use crate::history::record::InstanceHistory;

/// Store of per-instance history directories under one base path.
pub struct HistoryStore {
    base: PathBuf,
    filename: String,
}

impl HistoryStore {
    /// Creates a store rooted at `base` (the `instances` directory), reading
    /// and writing history files named `filename`.
    pub fn new(base: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            filename: filename.into(),
        }
    }

    /// Returns the history directory of one instance.
    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.base.join(instance_id)
    }

    /// Returns the history file path of one instance.
    pub fn history_file(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join(&self.filename)
    }

    /// Creates the history directory for an instance (0755) if absent.
    ///
    /// Modules receive this directory through their context and may write
    /// artifacts (such as the persisted user-data script) into it, so it
    /// must exist before the first bucket runs.
    pub fn ensure_instance_dir(&self, instance_id: &str) -> Result<PathBuf, InitError> {
        let dir = self.instance_dir(instance_id);
        if !dir.is_dir() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(&dir)
                .map_err(|e| InitError::HistoryWrite {
                    path: dir.clone(),
                    reason: format!("unable to create directory: {e}"),
                })?;
        }
        Ok(dir)
    }

    /// Reads every instance's history under the base path.
    ///
    /// Results are ordered by instance directory name for determinism.
    pub fn read_all(&self) -> Result<Vec<InstanceHistory>, InitError> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(InitError::HistoryIo {
                    path: self.base.clone(),
                    source,
                });
            }
        };

        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| InitError::HistoryIo {
                path: self.base.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut histories = Vec::new();
        for dir in dirs {
            let file = dir.join(&self.filename);
            match fs::metadata(&file) {
                Err(_) => continue,
                Ok(meta) if !meta.is_file() => {
                    tracing::warn!(path = %file.display(), "skipping irregular history file");
                    continue;
                }
                Ok(meta) if meta.len() == 0 => {
                    tracing::warn!(path = %file.display(), "skipping empty history file");
                    continue;
                }
                Ok(_) => {}
            }
            histories.push(read_history_file(&file)?);
        }

        Ok(histories)
    }

    /// Atomically writes one instance's history, replacing any prior record.
    ///
    /// Returns the final path on success.
    pub fn write(&self, history: &InstanceHistory) -> Result<PathBuf, InitError> {
        let dir = self.ensure_instance_dir(&history.instance_id)?;
        let target = dir.join(&self.filename);

        let bytes =
            serde_json::to_vec(history).map_err(|e| InitError::HistoryWrite {
                path: target.clone(),
                reason: format!("unable to encode history: {e}"),
            })?;

        // Temp file lives in the target directory so the rename is atomic
        // within one filesystem. Dropping it on any error path removes it.
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| InitError::HistoryWrite {
            path: target.clone(),
            reason: format!("unable to create temp file: {e}"),
        })?;
        tmp.write_all(&bytes).map_err(|e| InitError::HistoryWrite {
            path: target.clone(),
            reason: format!("unable to write temp file: {e}"),
        })?;
        tmp.as_file().sync_all().map_err(|e| InitError::HistoryWrite {
            path: target.clone(),
            reason: format!("unable to sync temp file: {e}"),
        })?;
        tmp.persist(&target).map_err(|e| InitError::HistoryWrite {
            path: target.clone(),
            reason: format!("unable to replace history file: {e}"),
        })?;

        Ok(target)
    }

    /// Removes one instance's history directory. Missing is not an error.
    pub fn clean_instance(&self, instance_id: &str) -> Result<(), InitError> {
        let dir = self.instance_dir(instance_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(InitError::HistoryIo { path: dir, source }),
        }
    }

    /// Removes every instance's history directory.
    pub fn clean_all(&self) -> Result<(), InitError> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(InitError::HistoryIo {
                    path: self.base.clone(),
                    source,
                });
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| InitError::HistoryIo {
                path: self.base.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)
                    .map_err(|source| InitError::HistoryIo { path, source })?;
            }
        }
        Ok(())
    }
}

/// Decodes one history file, distinguishing I/O from malformed content.
fn read_history_file(path: &Path) -> Result<InstanceHistory, InitError> {
    let bytes = fs::read(path).map_err(|source| InitError::HistoryIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| InitError::HistoryMalformed {
        path: path.to_path_buf(),
        source,
    })
}
