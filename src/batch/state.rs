//! Crash-safe batch state.
//!
//! The checkpoint is the single shared-mutable structure in the batch
//! layer. Updates go through one lock; serialization always works on a
//! snapshot clone taken under the lock, so encoders never traverse a map
//! another worker is mutating. Writes are atomic: temp file, fsync,
//! rename.

use crate::core::{FailureRecord, PipelineResult};
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable record of per-document batch progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Filenames that completed successfully.
    pub processed_files: HashSet<String>,
    /// Results per filename.
    pub results: HashMap<String, PipelineResult>,
    /// Failures per filename.
    pub failures: HashMap<String, FailureRecord>,
}

impl Checkpoint {
    /// Documents recorded in any state.
    #[must_use]
    pub fn total_seen(&self) -> usize {
        self.processed_files.len() + self.failures.len()
    }
}

/// Atomic, lock-mediated checkpoint store.
pub struct StateManager {
    path: PathBuf,
    state: Mutex<Checkpoint>,
}

impl StateManager {
    /// Opens a state manager, loading the existing checkpoint if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing checkpoint cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(StorageError::from)?
        } else {
            Checkpoint::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns a snapshot copy of the current checkpoint.
    #[must_use]
    pub fn load(&self) -> Checkpoint {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Records a successful document result.
    pub fn update_result(&self, filename: &str, result: PipelineResult) {
        if let Ok(mut state) = self.state.lock() {
            state.processed_files.insert(filename.to_string());
            state.results.insert(filename.to_string(), result);
            state.failures.remove(filename);
        }
    }

    /// Records a document failure.
    ///
    /// Failed documents are not marked processed, so a resumed batch
    /// retries them.
    pub fn update_failure(&self, filename: &str, failure: FailureRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(filename.to_string(), failure);
        }
    }

    /// Persists the checkpoint atomically.
    ///
    /// A snapshot is cloned under the lock and serialized outside it, so
    /// concurrent `update_result` calls can never corrupt an in-progress
    /// encode. The bytes land in a sibling temp file which is fsynced and
    /// renamed over the target.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.load();
        let payload = serde_json::to_vec_pretty(&snapshot).map_err(StorageError::from)?;

        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CheckpointWrite {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let temp_path = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(&payload)?;
            file.sync_all()?;
            std::fs::rename(&temp_path, &self.path)
        };
        write().map_err(|e| StorageError::CheckpointWrite {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            path = %self.path.display(),
            processed = snapshot.processed_files.len(),
            failures = snapshot.failures.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Persists the checkpoint off the async executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the blocking save fails or the task is
    /// cancelled.
    pub async fn save_async(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.save())
            .await
            .map_err(|e| StorageError::CheckpointWrite {
                path: "checkpoint".to_string(),
                reason: e.to_string(),
            })?
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
