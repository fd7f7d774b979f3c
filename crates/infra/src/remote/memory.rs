//! Scripted in-memory remote service.
//!
//! Used by scheduler tests and local dry runs. Behaviour per payload is set
//! with [`InMemoryRemoteService::script`]; unscripted jobs complete on their
//! first poll.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use simflow_core::{JobDescriptor, JobHandle, PollResult, RemoteId, ResultFields};

use super::{RemoteError, RemoteResult, RemoteService};

/// How a submitted job answers its polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobScript {
    /// Still running until the n-th poll, which completes.
    CompletesOnPoll(u32),
    /// Still running until the n-th poll, which reports the error status.
    FailsOnPoll(u32),
    /// Never terminal.
    RunsForever,
    /// Every poll fails at the transport level.
    TransportErrors,
    /// First poll asks to come back after the given wait, then completes.
    Throttled(Duration),
}

impl Default for JobScript {
    fn default() -> Self {
        JobScript::CompletesOnPoll(1)
    }
}

#[derive(Debug)]
struct FakeJob {
    payload: String,
    remote_id: RemoteId,
    script: JobScript,
    polls: u32,
}

#[derive(Debug, Default)]
struct State {
    auth_failures_left: u32,
    auth_calls: u32,
    submit_failures_left: HashMap<String, u32>,
    submit_calls: HashMap<String, u32>,
    scripts: HashMap<String, JobScript>,
    jobs: HashMap<JobHandle, FakeJob>,
    handles: HashMap<String, JobHandle>,
    reissued: HashMap<String, JobHandle>,
    id_recovery_fails: bool,
    next_id: u64,
}

/// Scripted fake of the simulation service.
#[derive(Debug, Default)]
pub struct InMemoryRemoteService {
    state: Mutex<State>,
}

impl InMemoryRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` authentication attempts fail.
    pub fn fail_authentication(&self, n: u32) {
        self.state().auth_failures_left = n;
    }

    /// The next `n` submissions of `payload` fail.
    pub fn fail_submissions(&self, payload: impl Into<String>, n: u32) {
        self.state().submit_failures_left.insert(payload.into(), n);
    }

    /// Poll behaviour for jobs submitted with `payload`.
    pub fn script(&self, payload: impl Into<String>, script: JobScript) {
        self.state().scripts.insert(payload.into(), script);
    }

    /// Make a handle known without submitting it (jobs from an earlier run).
    pub fn register_handle(&self, handle: JobHandle, payload: impl Into<String>, script: JobScript) {
        let mut state = self.state();
        state.next_id += 1;
        let remote_id = fake_remote_id(state.next_id);
        let payload = payload.into();
        state.handles.insert(payload.clone(), handle.clone());
        state.jobs.insert(
            handle,
            FakeJob {
                payload,
                remote_id,
                script,
                polls: 0,
            },
        );
    }

    /// Accept submissions of `payload` but answer with `handle` instead of a
    /// fresh one.
    pub fn reissue_handle(&self, payload: impl Into<String>, handle: JobHandle) {
        self.state().reissued.insert(payload.into(), handle);
    }

    /// Identifier lookups fail from now on.
    pub fn fail_id_recovery(&self) {
        self.state().id_recovery_fails = true;
    }

    pub fn auth_calls(&self) -> u32 {
        self.state().auth_calls
    }

    pub fn submit_calls(&self, payload: &str) -> u32 {
        self.state().submit_calls.get(payload).copied().unwrap_or(0)
    }

    pub fn poll_count(&self, handle: &JobHandle) -> u32 {
        self.state().jobs.get(handle).map_or(0, |job| job.polls)
    }

    /// Handle of the last accepted submission of `payload`.
    pub fn handle_for(&self, payload: &str) -> Option<JobHandle> {
        self.state().handles.get(payload).cloned()
    }

    pub fn remote_id_for(&self, payload: &str) -> Option<RemoteId> {
        let state = self.state();
        let handle = state.handles.get(payload)?;
        state.jobs.get(handle).map(|job| job.remote_id.clone())
    }
}

fn fake_remote_id(n: u64) -> RemoteId {
    RemoteId::new(format!("sim-{n}")).unwrap_or_else(|_| RemoteId::unknown())
}

fn completed_fields(job: &FakeJob) -> ResultFields {
    let id = job.remote_id.as_str().replacen("sim-", "alpha-", 1);
    match json!({ "id": id, "status": "COMPLETE", "regular": job.payload }) {
        serde_json::Value::Object(fields) => fields,
        _ => ResultFields::new(),
    }
}

fn not_found(handle: &JobHandle) -> RemoteError {
    RemoteError::Status {
        status: 404,
        endpoint: handle.to_string(),
    }
}

#[async_trait]
impl RemoteService for InMemoryRemoteService {
    async fn authenticate(&self) -> RemoteResult<()> {
        let mut state = self.state();
        state.auth_calls += 1;
        if state.auth_failures_left > 0 {
            state.auth_failures_left -= 1;
            return Err(RemoteError::Transport("authentication refused".into()));
        }
        Ok(())
    }

    async fn submit(&self, descriptor: &JobDescriptor) -> RemoteResult<JobHandle> {
        let mut state = self.state();
        let payload = descriptor.payload().to_string();
        *state.submit_calls.entry(payload.clone()).or_default() += 1;

        if let Some(left) = state.submit_failures_left.get_mut(&payload) {
            if *left > 0 {
                *left -= 1;
                return Err(RemoteError::Transport("connection reset".into()));
            }
        }

        if let Some(handle) = state.reissued.get(&payload) {
            return Ok(handle.clone());
        }

        state.next_id += 1;
        let n = state.next_id;
        let handle = JobHandle::new(format!("mem://simulations/{n}"))
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let script = state.scripts.get(&payload).copied().unwrap_or_default();
        state.handles.insert(payload.clone(), handle.clone());
        state.jobs.insert(
            handle.clone(),
            FakeJob {
                payload,
                remote_id: fake_remote_id(n),
                script,
                polls: 0,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> RemoteResult<PollResult> {
        let mut state = self.state();
        let job = state.jobs.get_mut(handle).ok_or_else(|| not_found(handle))?;
        job.polls += 1;

        let result = match job.script {
            JobScript::CompletesOnPoll(n) if job.polls >= n => {
                PollResult::Completed(completed_fields(job))
            }
            JobScript::FailsOnPoll(n) if job.polls >= n => {
                PollResult::RunFailed(job.remote_id.clone())
            }
            JobScript::TransportErrors => {
                return Err(RemoteError::Transport("poll timed out".into()));
            }
            JobScript::Throttled(wait) if job.polls == 1 => PollResult::StillRunning {
                retry_after: Some(wait),
            },
            JobScript::Throttled(_) => PollResult::Completed(completed_fields(job)),
            _ => PollResult::StillRunning { retry_after: None },
        };
        Ok(result)
    }

    async fn fetch_remote_id(&self, handle: &JobHandle) -> RemoteResult<RemoteId> {
        let state = self.state();
        if state.id_recovery_fails {
            return Err(RemoteError::Transport("id lookup failed".into()));
        }
        state
            .jobs
            .get(handle)
            .map(|job| job.remote_id.clone())
            .ok_or_else(|| not_found(handle))
    }
}
