//! Job lifecycle: session, submission, polling and the scheduler loop.
//!
//! ## Design
//!
//! - One cooperative loop owns all scheduler state; no locks
//! - Remote calls are single attempts; bounded retries wrap them here
//! - Every transition is written to the ledger before the snapshot
//! - Authentication exhaustion and storage failures are fatal
//!
//! ## Components
//!
//! - `SessionProvider`: authentication with a fresh budget per call
//! - `SubmissionGateway`: submission with bounded retries
//! - `StatusPoller`: one poll per call, call failures classified
//! - `Scheduler`: the loop tying queue, remote, ledger and snapshot together

pub mod clock;
pub mod gateway;
pub mod poller;
pub mod retry;
pub mod scheduler;
pub mod session;

pub use clock::Clock;
pub use gateway::{SubmissionGateway, SubmitOutcome};
pub use poller::StatusPoller;
pub use retry::retry_with;
pub use scheduler::{Scheduler, SchedulerError, SchedulerResult};
pub use session::{AuthExhausted, SessionProvider};
