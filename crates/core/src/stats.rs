//! Scheduler runtime statistics.

use serde::Serialize;

use crate::outcome::TerminalOutcome;

/// Counters for one scheduler process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub iterations: u64,
    pub submitted: u64,
    pub completed: u64,
    pub submission_failed: u64,
    pub run_failed: u64,
    pub timed_out: u64,
    pub reauthentications: u64,
}

impl SchedulerStats {
    pub fn record(&mut self, outcome: &TerminalOutcome) {
        match outcome {
            TerminalOutcome::Completed(_) => self.completed += 1,
            TerminalOutcome::SubmissionFailed(_) => self.submission_failed += 1,
            TerminalOutcome::RunFailed { .. } => self.run_failed += 1,
            TerminalOutcome::TimedOut { .. } => self.timed_out += 1,
        }
    }

    /// Jobs that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.submission_failed + self.run_failed + self.timed_out
    }
}
