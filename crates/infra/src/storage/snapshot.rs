//! Single-slot resumable scheduler state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use simflow_core::SchedulerSnapshot;

use super::{StorageError, StorageResult, write_atomically};

/// JSON snapshot file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last saved snapshot; `None` on first start.
    ///
    /// A file that exists but does not parse is an error: resuming from a
    /// guessed state could duplicate or lose jobs.
    pub fn load(&self) -> StorageResult<Option<SchedulerSnapshot>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        let snapshot: SchedulerSnapshot =
            serde_json::from_str(&text).map_err(|e| StorageError::json(&self.path, e))?;
        info!(
            snapshot = %self.path.display(),
            pending = snapshot.pending_batch.len(),
            active = snapshot.active.len(),
            "restored scheduler snapshot"
        );
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &SchedulerSnapshot) -> StorageResult<()> {
        let path = self.path.as_path();
        let bytes =
            serde_json::to_vec_pretty(snapshot).map_err(|e| StorageError::json(path, e))?;
        write_atomically(path, |file| {
            file.write_all(&bytes).map_err(|e| StorageError::io(path, e))
        })?;
        debug!(
            pending = snapshot.pending_batch.len(),
            active = snapshot.active.len(),
            "snapshot saved"
        );
        Ok(())
    }
}
