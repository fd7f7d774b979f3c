//! Infrastructure layer: file-backed stores, remote service adapters,
//! configuration and the job lifecycle scheduler.

pub mod config;
pub mod jobs;
pub mod remote;
pub mod storage;

pub use config::{AppConfig, ConfigError, Credentials, DataPaths, RemoteConfig, SchedulerConfig};
pub use jobs::{Scheduler, SchedulerError};
pub use remote::{HttpRemoteService, InMemoryRemoteService, JobScript, RemoteError, RemoteService};
pub use storage::{Ledger, QueueStore, SnapshotStore, StorageError};
