//! Append-only outcome ledger.
//!
//! One CSV log per terminal category. Each record is flushed and synced
//! before `record` returns.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use simflow_core::{ResultFields, TerminalOutcome};

use super::queue::{KIND_COLUMN, PAYLOAD_COLUMN, SETTINGS_COLUMN};
use super::{StorageError, StorageResult, is_missing_or_empty, open_append};

pub const ID_COLUMN: &str = "id";

type Row = Vec<(String, String)>;

/// Single append-only CSV file whose columns are fixed once known.
#[derive(Debug)]
struct CsvLog {
    path: PathBuf,
    header: Option<Vec<String>>,
}

impl CsvLog {
    fn new(path: PathBuf) -> Self {
        Self { path, header: None }
    }

    fn append(&mut self, row: Row) -> StorageResult<()> {
        let (header, fresh) = self.resolve_header(&row)?;

        let dropped: Vec<&str> = row
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !header.iter().any(|h| h == k))
            .collect();
        if !dropped.is_empty() {
            warn!(
                ledger = %self.path.display(),
                dropped = ?dropped,
                "record has columns outside the ledger header; dropping them"
            );
        }

        let projected: Vec<&str> = header
            .iter()
            .map(|column| {
                row.iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or_default()
            })
            .collect();

        let path = self.path.as_path();
        let mut file = open_append(path)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(&mut file);
            if fresh {
                writer
                    .write_record(&header)
                    .map_err(|e| StorageError::csv(path, e))?;
            }
            writer
                .write_record(&projected)
                .map_err(|e| StorageError::csv(path, e))?;
            writer.flush().map_err(|e| StorageError::io(path, e))?;
        }
        file.sync_data().map_err(|e| StorageError::io(path, e))
    }

    /// Columns for this log and whether the header still has to be written.
    fn resolve_header(&mut self, row: &Row) -> StorageResult<(Vec<String>, bool)> {
        if let Some(header) = &self.header {
            return Ok((header.clone(), false));
        }

        let (header, fresh) = if is_missing_or_empty(&self.path)? {
            (row.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(), true)
        } else {
            (read_header(&self.path)?, false)
        };
        self.header = Some(header.clone());
        Ok((header, fresh))
    }
}

fn read_header(path: &Path) -> StorageResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| StorageError::csv(path, e))?;
    let header = reader.headers().map_err(|e| StorageError::csv(path, e))?;
    if header.is_empty() {
        return Err(StorageError::format(path, "ledger has no header"));
    }
    Ok(header.iter().map(str::to_string).collect())
}

/// Textual form of one result field.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn completed_row(fields: &ResultFields) -> Row {
    fields.iter().map(|(k, v)| (k.clone(), cell(v))).collect()
}

/// The three outcome logs.
#[derive(Debug)]
pub struct Ledger {
    completed: CsvLog,
    submission_failed: CsvLog,
    run_failed: CsvLog,
}

impl Ledger {
    pub fn new(
        completed: impl Into<PathBuf>,
        submission_failed: impl Into<PathBuf>,
        run_failed: impl Into<PathBuf>,
    ) -> Self {
        Self {
            completed: CsvLog::new(completed.into()),
            submission_failed: CsvLog::new(submission_failed.into()),
            run_failed: CsvLog::new(run_failed.into()),
        }
    }

    /// Append the record for `outcome` to its log.
    pub fn record(&mut self, outcome: &TerminalOutcome) -> StorageResult<()> {
        let (log, row) = match outcome {
            TerminalOutcome::Completed(fields) => (&mut self.completed, completed_row(fields)),
            TerminalOutcome::SubmissionFailed(descriptor) => (
                &mut self.submission_failed,
                vec![
                    (KIND_COLUMN.to_string(), descriptor.kind().to_string()),
                    (SETTINGS_COLUMN.to_string(), descriptor.settings().to_cell()),
                    (PAYLOAD_COLUMN.to_string(), descriptor.payload().to_string()),
                ],
            ),
            TerminalOutcome::RunFailed { remote_id, .. }
            | TerminalOutcome::TimedOut { remote_id, .. } => (
                &mut self.run_failed,
                vec![(ID_COLUMN.to_string(), remote_id.to_string())],
            ),
        };
        log.append(row)?;
        debug!(ledger = %log.path.display(), outcome = outcome.label(), "ledger record written");
        Ok(())
    }
}
