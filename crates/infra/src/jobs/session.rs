//! Authenticated session establishment.

use std::sync::Arc;

use tracing::{error, info};

use simflow_core::{RetryOutcome, RetryPolicy};

use super::retry::retry_with;
use crate::remote::{RemoteError, RemoteService};

/// Authentication failed on every attempt the policy allows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed after {attempts} attempts: {last_error}")]
pub struct AuthExhausted {
    pub attempts: u32,
    pub last_error: RemoteError,
}

/// Establishes and re-establishes the remote session.
///
/// Every call gets a fresh attempt budget.
pub struct SessionProvider<R> {
    remote: Arc<R>,
    policy: RetryPolicy,
}

impl<R: RemoteService> SessionProvider<R> {
    pub fn new(remote: Arc<R>, policy: RetryPolicy) -> Self {
        Self { remote, policy }
    }

    /// Authenticate, returning the number of attempts used.
    pub async fn authenticate(&self) -> Result<u32, AuthExhausted> {
        let remote = &self.remote;
        match retry_with(&self.policy, "authenticate", |_| remote.authenticate()).await {
            RetryOutcome::Succeeded { attempts, .. } => {
                info!(attempts, "authenticated with remote service");
                Ok(attempts)
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                error!(attempts, error = %last_error, "authentication exhausted");
                Err(AuthExhausted {
                    attempts,
                    last_error,
                })
            }
        }
    }
}
