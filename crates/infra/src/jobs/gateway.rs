//! Submission of descriptors with bounded retries.

use std::sync::Arc;

use tracing::debug;

use simflow_core::{JobDescriptor, JobHandle, RetryOutcome, RetryPolicy};

use super::retry::retry_with;
use crate::remote::{RemoteError, RemoteService};

/// Result of submitting one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { handle: JobHandle, attempts: u32 },
    Exhausted { attempts: u32, last_error: RemoteError },
}

/// Submits descriptors, retrying transport failures per policy.
///
/// A missing `Location` header counts as a failed attempt.
pub struct SubmissionGateway<R> {
    remote: Arc<R>,
    policy: RetryPolicy,
}

impl<R: RemoteService> SubmissionGateway<R> {
    pub fn new(remote: Arc<R>, policy: RetryPolicy) -> Self {
        Self { remote, policy }
    }

    pub async fn submit(&self, descriptor: &JobDescriptor) -> SubmitOutcome {
        if descriptor.is_flagged() {
            debug!(
                payload = descriptor.payload(),
                "submitting descriptor with undecoded settings as-is"
            );
        }
        let remote = &self.remote;
        match retry_with(&self.policy, "submit", |_| remote.submit(descriptor)).await {
            RetryOutcome::Succeeded { value, attempts } => SubmitOutcome::Accepted {
                handle: value,
                attempts,
            },
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => SubmitOutcome::Exhausted {
                attempts,
                last_error,
            },
        }
    }
}
