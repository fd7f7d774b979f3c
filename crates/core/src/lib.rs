//! `simflow-core`: job lifecycle domain types.
//!
//! This crate contains **pure domain** primitives (no I/O, no runtime):
//! descriptors, handles, the active-job registry, poll/terminal outcomes,
//! the resumable snapshot and retry policies.

pub mod active;
pub mod error;
pub mod grid;
pub mod id;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod stats;

pub use active::{ActiveJobRecord, ActiveJobSet};
pub use error::{DomainError, DomainResult};
pub use grid::SettingsGrid;
pub use id::{JobHandle, RemoteId, RunId};
pub use job::{JobDescriptor, SettingValue, Settings, SettingsMap};
pub use outcome::{PollResult, ResultFields, SchedulerSnapshot, TerminalOutcome};
pub use retry::{RetryOutcome, RetryPolicy};
pub use stats::SchedulerStats;
