//! Remote simulation service adapters.
//!
//! The scheduler talks to the service only through [`RemoteService`]; the
//! HTTP client and the scripted in-memory fake both implement it.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use simflow_core::{JobDescriptor, JobHandle, PollResult, RemoteId};

pub use http::HttpRemoteService;
pub use memory::{InMemoryRemoteService, JobScript};

/// Remote call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{endpoint} answered with status {status}")]
    Status { status: u16, endpoint: String },

    #[error("submission accepted without a Location header")]
    MissingHandle,

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    Url(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Status {
                status: status.as_u16(),
                endpoint: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The remote simulation service.
///
/// Each method is one attempt; bounded retries live in the callers.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Establish (or refresh) the session.
    async fn authenticate(&self) -> RemoteResult<()>;

    /// Submit one descriptor, returning the status handle.
    async fn submit(&self, descriptor: &JobDescriptor) -> RemoteResult<JobHandle>;

    /// Query a handle once and classify the answer.
    async fn poll(&self, handle: &JobHandle) -> RemoteResult<PollResult>;

    /// Read the remote identifier behind a handle.
    async fn fetch_remote_id(&self, handle: &JobHandle) -> RemoteResult<RemoteId>;
}
