//! Poll classification, terminal outcomes and the resumable snapshot.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::active::ActiveJobRecord;
use crate::id::{JobHandle, RemoteId};
use crate::job::JobDescriptor;

/// Fields of a remote result record, as returned by the service.
pub type ResultFields = Map<String, Value>;

/// Classification of a single status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// The job is still queued or running; `retry_after` is the service's
    /// advisory wait, when it sent one.
    StillRunning { retry_after: Option<Duration> },
    /// Terminal success with the full result record.
    Completed(ResultFields),
    /// The service reported the error status for this job.
    RunFailed(RemoteId),
    /// The poll itself failed; the job's state is unknown.
    TransportError(String),
}

/// Final state of a job; each one produces exactly one ledger record.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed(ResultFields),
    SubmissionFailed(JobDescriptor),
    RunFailed { handle: JobHandle, remote_id: RemoteId },
    TimedOut { handle: JobHandle, remote_id: RemoteId },
}

impl TerminalOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TerminalOutcome::Completed(_) => "completed",
            TerminalOutcome::SubmissionFailed(_) => "submission_failed",
            TerminalOutcome::RunFailed { .. } => "run_failed",
            TerminalOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

/// The complete resumable scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    #[serde(default)]
    pub pending_batch: Vec<JobDescriptor>,
    #[serde(default)]
    pub active: Vec<ActiveJobRecord>,
    /// Queue rows read into `pending_batch` whose removal from the queue file
    /// has not been confirmed yet, exactly as they were read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub withdrawing: Vec<JobDescriptor>,
}

impl SchedulerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pending_batch.is_empty() && self.active.is_empty() && self.withdrawing.is_empty()
    }
}
