//! File-backed persistence: pending queue, outcome ledger, resumable snapshot.
//!
//! Every whole-file rewrite goes through [`write_atomically`] (temp file,
//! fsync, rename) so a reader never observes a torn file. Ledgers are
//! append-only and flushed to disk after each record.

pub mod ledger;
pub mod queue;
pub mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub use ledger::Ledger;
pub use queue::{QueueBatch, QueueStore};
pub use snapshot::SnapshotStore;

/// Storage error.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json error on {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed file {}: {message}", .path.display())]
    Format { path: PathBuf, message: String },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Create the parent directory of `path` if needed.
pub(crate) fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Replace `path` with the bytes produced by `write`, atomically.
///
/// The content goes to a sibling `.tmp` file which is fsynced and renamed
/// over the target; the parent directory is synced afterwards where the
/// platform allows it.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> StorageResult<()>
where
    F: FnOnce(&mut File) -> StorageResult<()>,
{
    ensure_parent(path)?;
    let tmp_path = tmp_path_for(path);

    let mut file = File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    if let Err(err) = write(&mut file) {
        drop(file);
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    file.flush().map_err(|e| StorageError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| StorageError::io(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))?;
    sync_parent_dir(path);
    Ok(())
}

/// Open `path` for appending, creating it (and its directory) if needed.
pub(crate) fn open_append(path: &Path) -> StorageResult<File> {
    ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io(path, e))
}

/// True when `path` is missing or has no content.
pub(crate) fn is_missing_or_empty(path: &Path) -> StorageResult<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomically(&path, |f| {
            f.write_all(b"first").map_err(|e| StorageError::io(&path, e))
        })
        .unwrap();
        write_atomically(&path, |f| {
            f.write_all(b"second").map_err(|e| StorageError::io(&path, e))
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn failed_write_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "stable").unwrap();

        let result = write_atomically(&path, |_| Err(StorageError::format(&path, "boom")));

        assert!(matches!(result, Err(StorageError::Format { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "stable");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn missing_and_empty_files_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        assert!(is_missing_or_empty(&path).unwrap());
        fs::write(&path, "").unwrap();
        assert!(is_missing_or_empty(&path).unwrap());
        fs::write(&path, "id\n").unwrap();
        assert!(!is_missing_or_empty(&path).unwrap());
    }
}
