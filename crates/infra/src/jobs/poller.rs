//! Status polling of active jobs.

use std::sync::Arc;

use tracing::{debug, warn};

use simflow_core::{JobHandle, PollResult, RemoteId};

use crate::remote::RemoteService;

/// Queries handles once per call; never retries.
pub struct StatusPoller<R> {
    remote: Arc<R>,
}

impl<R: RemoteService> StatusPoller<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }

    /// Classify the current state of `handle`. Call failures become
    /// [`PollResult::TransportError`].
    pub async fn poll(&self, handle: &JobHandle) -> PollResult {
        match self.remote.poll(handle).await {
            Ok(result) => {
                debug!(handle = %handle, result = ?result, "polled");
                result
            }
            Err(err) => {
                warn!(handle = %handle, error = %err, "poll failed");
                PollResult::TransportError(err.to_string())
            }
        }
    }

    /// Best-effort lookup of the remote identifier; `unknown` on failure.
    pub async fn recover_remote_id(&self, handle: &JobHandle) -> RemoteId {
        match self.remote.fetch_remote_id(handle).await {
            Ok(id) => id,
            Err(err) => {
                warn!(handle = %handle, error = %err, "could not recover remote id");
                RemoteId::unknown()
            }
        }
    }
}
