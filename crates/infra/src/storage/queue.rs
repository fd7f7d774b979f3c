//! Durable FIFO of pending job descriptors, backed by a CSV file.
//!
//! Layout: header `type,settings,regular`, one descriptor per row, the
//! `settings` cell holding a JSON object. Withdrawal rewrites the remainder
//! atomically; it never edits the file in place.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use csv::ByteRecord;
use tracing::{debug, info, warn};

use simflow_core::{JobDescriptor, Settings};

use super::{StorageError, StorageResult, is_missing_or_empty, open_append, write_atomically};

pub const KIND_COLUMN: &str = "type";
pub const SETTINGS_COLUMN: &str = "settings";
pub const PAYLOAD_COLUMN: &str = "regular";

/// Descriptors read from the front of the queue, not yet removed from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBatch {
    descriptors: Vec<JobDescriptor>,
    consumed: usize,
}

impl QueueBatch {
    pub fn descriptors(&self) -> &[JobDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<JobDescriptor> {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    kind: usize,
    settings: usize,
    payload: usize,
    width: usize,
}

/// File-backed pending queue.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
    mirror_path: Option<PathBuf>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror_path: None,
        }
    }

    /// Also write each withdrawn batch to `path` (monitoring only).
    pub fn with_mirror(mut self, path: impl Into<PathBuf>) -> Self {
        self.mirror_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `n` descriptors from the front without removing them.
    ///
    /// An empty batch means the queue is drained. Rows whose settings cell
    /// does not decode, or that are not valid UTF-8, are returned flagged.
    pub fn peek_batch(&self, n: usize) -> StorageResult<QueueBatch> {
        let Some(mut reader) = self.open_reader()? else {
            return Ok(QueueBatch::default());
        };
        let Some(columns) = self.columns(&mut reader)? else {
            return Ok(QueueBatch::default());
        };

        let mut batch = QueueBatch::default();
        for record in reader.byte_records().take(n) {
            let record = record.map_err(|e| StorageError::csv(&self.path, e))?;
            batch.consumed += 1;
            batch
                .descriptors
                .push(self.decode_row(&record, columns, batch.consumed));
        }
        Ok(batch)
    }

    /// Remove the rows of a previously peeked batch from the queue file.
    ///
    /// Remaining rows are copied byte for byte.
    pub fn commit(&self, batch: &QueueBatch) -> StorageResult<()> {
        if batch.consumed == 0 {
            return Ok(());
        }
        let Some(mut reader) = self.open_reader()? else {
            return Err(StorageError::format(&self.path, "queue file vanished before commit"));
        };
        let headers = reader
            .byte_headers()
            .map_err(|e| StorageError::csv(&self.path, e))?
            .clone();

        let path = self.path.as_path();
        let mut remaining = 0usize;
        write_atomically(path, |file| {
            let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
            writer
                .write_byte_record(&headers)
                .map_err(|e| StorageError::csv(path, e))?;
            for record in reader.byte_records().skip(batch.consumed) {
                let record = record.map_err(|e| StorageError::csv(path, e))?;
                writer
                    .write_byte_record(&record)
                    .map_err(|e| StorageError::csv(path, e))?;
                remaining += 1;
            }
            writer.flush().map_err(|e| StorageError::io(path, e))
        })?;

        info!(
            queue = %self.path.display(),
            withdrawn = batch.consumed,
            remaining,
            "withdrew batch from pending queue"
        );
        self.write_mirror(batch.descriptors());
        Ok(())
    }

    /// Drop the leading rows if they are exactly `withdrawn`, in order.
    ///
    /// Used on startup: a crash after the snapshot captured a batch but before
    /// the queue rewrite leaves the same rows at the front of the queue.
    pub fn discard_prefix(&self, withdrawn: &[JobDescriptor]) -> StorageResult<bool> {
        if withdrawn.is_empty() {
            return Ok(false);
        }
        let batch = self.peek_batch(withdrawn.len())?;
        let matches = batch.len() == withdrawn.len()
            && batch
                .descriptors()
                .iter()
                .zip(withdrawn)
                .all(|(queued, held)| queued.same_job(held));
        if matches {
            warn!(
                queue = %self.path.display(),
                rows = batch.len(),
                "queue still holds the restored pending batch; discarding duplicate rows"
            );
            self.commit(&batch)?;
        }
        Ok(matches)
    }

    /// Append descriptors to the end of the queue, creating it if needed.
    pub fn append(&self, descriptors: &[JobDescriptor]) -> StorageResult<usize> {
        let fresh = is_missing_or_empty(&self.path)?;
        let columns = if fresh {
            Columns {
                kind: 0,
                settings: 1,
                payload: 2,
                width: 3,
            }
        } else {
            let mut reader = self
                .open_reader()?
                .ok_or_else(|| StorageError::format(&self.path, "queue file vanished"))?;
            self.columns(&mut reader)?
                .ok_or_else(|| StorageError::format(&self.path, "queue file has no header"))?
        };

        let mut file = open_append(&self.path)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(&mut file);
            if fresh {
                writer
                    .write_record([KIND_COLUMN, SETTINGS_COLUMN, PAYLOAD_COLUMN])
                    .map_err(|e| StorageError::csv(&self.path, e))?;
            }
            for descriptor in descriptors {
                let mut row = vec![String::new(); columns.width];
                row[columns.kind] = descriptor.kind().to_string();
                row[columns.settings] = descriptor.settings().to_cell();
                row[columns.payload] = descriptor.payload().to_string();
                writer
                    .write_record(&row)
                    .map_err(|e| StorageError::csv(&self.path, e))?;
            }
            writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        }
        file.sync_data()
            .map_err(|e| StorageError::io(&self.path, e))?;

        debug!(queue = %self.path.display(), appended = descriptors.len(), "appended to pending queue");
        Ok(descriptors.len())
    }

    /// Number of descriptors still queued.
    pub fn len(&self) -> StorageResult<usize> {
        let Some(mut reader) = self.open_reader()? else {
            return Ok(0);
        };
        if self.columns(&mut reader)?.is_none() {
            return Ok(0);
        }
        let mut count = 0;
        for record in reader.byte_records() {
            record.map_err(|e| StorageError::csv(&self.path, e))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn open_reader(&self) -> StorageResult<Option<csv::Reader<File>>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(
                csv::ReaderBuilder::new().flexible(true).from_reader(file),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Resolve column positions; `None` for a file without a header.
    fn columns(&self, reader: &mut csv::Reader<File>) -> StorageResult<Option<Columns>> {
        let headers = reader
            .byte_headers()
            .map_err(|e| StorageError::csv(&self.path, e))?;
        if headers.is_empty() {
            return Ok(None);
        }
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| String::from_utf8_lossy(h).trim() == name)
                .ok_or_else(|| StorageError::format(&self.path, format!("missing column `{name}`")))
        };
        Ok(Some(Columns {
            kind: find(KIND_COLUMN)?,
            settings: find(SETTINGS_COLUMN)?,
            payload: find(PAYLOAD_COLUMN)?,
            width: headers.len(),
        }))
    }

    fn decode_row(&self, record: &ByteRecord, columns: Columns, row: usize) -> JobDescriptor {
        let field = |i: usize| String::from_utf8_lossy(record.get(i).unwrap_or_default());
        let kind = field(columns.kind);
        let cell = field(columns.settings);
        let payload = field(columns.payload);

        if std::str::from_utf8(record.as_slice()).is_err() {
            warn!(
                queue = %self.path.display(),
                row,
                payload = %payload,
                "row is not valid UTF-8; row kept and flagged"
            );
            return JobDescriptor::from_parts(kind, Settings::Raw(cell.into_owned()), payload);
        }

        let (settings, err) = Settings::from_cell(&cell);
        if let Some(err) = err {
            warn!(
                queue = %self.path.display(),
                row,
                payload = %payload,
                error = %err,
                "settings could not be decoded; row kept and flagged"
            );
        }
        JobDescriptor::from_parts(kind, settings, payload)
    }

    fn write_mirror(&self, descriptors: &[JobDescriptor]) {
        let Some(mirror) = self.mirror_path.as_deref() else {
            return;
        };
        let result = write_atomically(mirror, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record([KIND_COLUMN, SETTINGS_COLUMN, PAYLOAD_COLUMN])
                .map_err(|e| StorageError::csv(mirror, e))?;
            for d in descriptors {
                writer
                    .write_record([d.kind(), d.settings().to_cell().as_str(), d.payload()])
                    .map_err(|e| StorageError::csv(mirror, e))?;
            }
            writer.flush().map_err(|e| StorageError::io(mirror, e))
        });
        if let Err(err) = result {
            warn!(mirror = %mirror.display(), error = %err, "failed to update queue mirror");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use simflow_core::{SettingsGrid, SettingsMap};

    use super::*;

    fn job(payload: &str) -> JobDescriptor {
        let mut settings = SettingsMap::new();
        settings.insert("decay".into(), 4i64.into());
        JobDescriptor::new("REGULAR", settings, payload)
    }

    fn seeded(dir: &tempfile::TempDir, payloads: &[&str]) -> QueueStore {
        let store = QueueStore::new(dir.path().join("pending.csv"));
        let jobs: Vec<_> = payloads.iter().map(|p| job(p)).collect();
        store.append(&jobs).unwrap();
        store
    }

    fn payloads(jobs: &[JobDescriptor]) -> Vec<&str> {
        jobs.iter().map(|j| j.payload()).collect()
    }

    fn withdraw(store: &QueueStore, n: usize) -> Vec<JobDescriptor> {
        let batch = store.peek_batch(n).unwrap();
        store.commit(&batch).unwrap();
        batch.into_descriptors()
    }

    #[test]
    fn withdrawal_takes_front_and_rewrites_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, &["a", "b", "c", "d", "e"]);

        let batch = withdraw(&store, 2);
        assert_eq!(payloads(&batch), vec!["a", "b"]);
        assert_eq!(batch[0], job("a"));
        assert_eq!(store.len().unwrap(), 3);

        let rest = withdraw(&store, 10);
        assert_eq!(payloads(&rest), vec!["c", "d", "e"]);
        assert!(withdraw(&store, 10).is_empty());

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.trim(), "type,settings,regular");
    }

    #[test]
    fn missing_queue_is_drained_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("absent.csv"));
        assert!(withdraw(&store, 5).is_empty());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn undecodable_settings_are_flagged_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.csv");
        fs::write(
            &path,
            "type,settings,regular\n\
             REGULAR,\"{'decay': 4}\",rank(a)\n\
             REGULAR,\"{\"\"decay\"\":4}\",rank(b)\n",
        )
        .unwrap();
        let store = QueueStore::new(&path);

        let batch = withdraw(&store, 5);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_flagged());
        assert_eq!(batch[0].settings().to_cell(), "{'decay': 4}");
        assert!(!batch[1].is_flagged());
        assert_eq!(batch[1], job("rank(b)"));
    }

    #[test]
    fn peek_leaves_queue_untouched_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, &["a", "b", "c"]);

        let batch = store.peek_batch(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(store.len().unwrap(), 3);

        store.commit(&batch).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(payloads(&store.peek_batch(5).unwrap().into_descriptors()), vec!["c"]);
    }

    #[test]
    fn discard_prefix_only_matches_exact_leading_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, &["a", "b", "c"]);

        assert!(!store.discard_prefix(&[job("b")]).unwrap());
        assert!(!store.discard_prefix(&[job("a"), job("c")]).unwrap());
        assert_eq!(store.len().unwrap(), 3);

        assert!(store.discard_prefix(&[job("a"), job("b")]).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn withdrawn_batch_is_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("monitor").join("sim_queue.csv");
        let store = seeded(&dir, &["a", "b", "c"]).with_mirror(&mirror);

        withdraw(&store, 2);

        let content = fs::read_to_string(&mirror).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",a"));
        assert!(lines[2].ends_with(",b"));
    }

    #[test]
    fn append_follows_existing_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.csv");
        fs::write(&path, "regular,type,settings,note\n").unwrap();
        let store = QueueStore::new(&path);

        let jobs = SettingsGrid::fast_expression_defaults()
            .axis("decay", [0i64, 5])
            .expand(["rank(x)"]);
        assert_eq!(store.append(&jobs).unwrap(), 2);

        let batch = withdraw(&store, 5);
        assert_eq!(batch, jobs);
    }

    #[test]
    fn non_utf8_row_is_flagged_and_later_rows_survive_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.csv");
        fs::write(
            &path,
            b"type,settings,regular\nREGULAR,{},rank(a)\nREGULAR,{},rank(\xff)\nREGULAR,{},rank(b)\n",
        )
        .unwrap();
        let store = QueueStore::new(&path);

        let first = withdraw(&store, 1);
        assert!(!first[0].is_flagged());
        assert!(fs::read(&path).unwrap().windows(7).any(|w| w == b"rank(\xff)"));

        let batch = withdraw(&store, 5);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_flagged());
        assert_eq!(batch[0].payload(), "rank(\u{FFFD})");
        assert_eq!(batch[0].settings().to_cell(), "{}");
        assert!(!batch[1].is_flagged());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn discard_prefix_matches_settings_not_just_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("pending.csv"));
        let jobs = SettingsGrid::fast_expression_defaults()
            .axis("decay", [0i64, 4])
            .expand(["rank(a)"]);
        store.append(&jobs).unwrap();

        assert!(!store.discard_prefix(&jobs[1..]).unwrap());
        assert!(store.discard_prefix(&jobs[..1]).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }
}
