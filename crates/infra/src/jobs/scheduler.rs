//! The job lifecycle scheduler.
//!
//! A single cooperative loop owns all state: the pending batch, the active
//! set and the stores. Each iteration polls due jobs, refills the pending
//! batch, submits up to the concurrency cap, and persists the snapshot after
//! every transition.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use simflow_core::{
    ActiveJobSet, JobDescriptor, JobHandle, PollResult, RunId, SchedulerSnapshot, SchedulerStats,
    TerminalOutcome,
};

use super::clock::Clock;
use super::gateway::{SubmissionGateway, SubmitOutcome};
use super::poller::StatusPoller;
use super::session::{AuthExhausted, SessionProvider};
use crate::config::{DataPaths, SchedulerConfig};
use crate::remote::RemoteService;
use crate::storage::{Ledger, QueueStore, SnapshotStore, StorageError};

/// Conditions that stop the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Auth(#[from] AuthExhausted),

    #[error("durable state unavailable: {0}")]
    Storage(#[from] StorageError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

pub struct Scheduler<R: RemoteService> {
    config: SchedulerConfig,
    run_id: RunId,
    clock: Clock,
    session: SessionProvider<R>,
    gateway: SubmissionGateway<R>,
    poller: StatusPoller<R>,
    queue: QueueStore,
    snapshots: SnapshotStore,
    ledger: Ledger,
    pending: VecDeque<JobDescriptor>,
    withdrawing: Vec<JobDescriptor>,
    active: ActiveJobSet,
    stats: SchedulerStats,
    drained: bool,
    idle: bool,
}

impl<R: RemoteService> Scheduler<R> {
    /// Open the stores under `paths` and restore the last snapshot.
    pub fn open(config: SchedulerConfig, paths: &DataPaths, remote: Arc<R>) -> SchedulerResult<Self> {
        let queue = QueueStore::new(&paths.queue).with_mirror(&paths.queue_mirror);
        let snapshots = SnapshotStore::new(&paths.snapshot);
        let ledger = Ledger::new(&paths.completed, &paths.submission_failed, &paths.run_failed);
        Self::from_stores(config, queue, snapshots, ledger, remote)
    }

    pub fn from_stores(
        config: SchedulerConfig,
        queue: QueueStore,
        snapshots: SnapshotStore,
        ledger: Ledger,
        remote: Arc<R>,
    ) -> SchedulerResult<Self> {
        let restored = snapshots.load()?.unwrap_or_default();
        let interrupted = !restored.withdrawing.is_empty();
        if interrupted {
            queue.discard_prefix(&restored.withdrawing)?;
        }

        let scheduler = Self {
            session: SessionProvider::new(remote.clone(), config.auth_policy.clone()),
            gateway: SubmissionGateway::new(remote.clone(), config.submission_policy.clone()),
            poller: StatusPoller::new(remote),
            config,
            run_id: RunId::new(),
            clock: Clock::start(),
            queue,
            snapshots,
            ledger,
            pending: restored.pending_batch.into(),
            withdrawing: Vec::new(),
            active: ActiveJobSet::from_records(restored.active),
            stats: SchedulerStats::default(),
            drained: false,
            idle: false,
        };

        if interrupted {
            scheduler.persist()?;
        }

        info!(
            run_id = %scheduler.run_id,
            max_concurrent = scheduler.config.max_concurrent,
            pending = scheduler.pending.len(),
            active = scheduler.active.len(),
            "scheduler opened"
        );
        Ok(scheduler)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn active(&self) -> &ActiveJobSet {
        &self.active
    }

    pub fn pending(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.pending.iter()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Current in-memory state, as it would be persisted.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            pending_batch: self.pending.iter().cloned().collect(),
            active: self.active.records().to_vec(),
            withdrawing: self.withdrawing.clone(),
        }
    }

    /// Authenticate, then loop until `shutdown` is notified.
    ///
    /// Returns the run statistics on shutdown. Authentication exhaustion and
    /// storage failures stop the loop with an error.
    pub async fn run(&mut self, shutdown: Arc<Notify>) -> SchedulerResult<SchedulerStats> {
        info!(run_id = %self.run_id, "scheduler starting");
        self.session.authenticate().await?;

        loop {
            if let Err(err) = self.run_iteration().await {
                error!(run_id = %self.run_id, error = %err, "scheduler stopped");
                return Err(err);
            }
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(
            run_id = %self.run_id,
            stats = ?self.stats,
            pending = self.pending.len(),
            active = self.active.len(),
            "scheduler shut down"
        );
        Ok(self.stats.clone())
    }

    /// One pass: poll, refill, submit. Does not sleep between passes.
    pub async fn run_iteration(&mut self) -> SchedulerResult<()> {
        self.stats.iterations += 1;

        self.poll_active().await?;
        if self.pending.is_empty() {
            self.refill()?;
        }
        self.fill_capacity().await?;

        self.log_progress();
        Ok(())
    }

    async fn poll_active(&mut self) -> SchedulerResult<()> {
        let now = self.clock.now();
        for record in self.active.records().to_vec() {
            let expired = record
                .elapsed(now)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.watchdog_timeout);
            let due = record.is_due(now);
            let handle = record.handle;

            if !due {
                if expired {
                    self.time_out(handle).await?;
                }
                continue;
            }

            match self.poller.poll(&handle).await {
                PollResult::Completed(fields) => {
                    self.finish(handle, TerminalOutcome::Completed(fields))?;
                }
                PollResult::RunFailed(remote_id) => {
                    self.finish(handle.clone(), TerminalOutcome::RunFailed { handle, remote_id })?;
                }
                PollResult::StillRunning { retry_after } => {
                    if expired {
                        self.time_out(handle).await?;
                    } else if let Some(wait) = retry_after {
                        self.defer(&handle, now, wait);
                    }
                }
                PollResult::TransportError(reason) => {
                    warn!(handle = %handle, reason = %reason, "poll transport error");
                    self.reauthenticate("poll transport error").await?;
                    if expired {
                        self.time_out(handle).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Skip polls of `handle` for `wait`, capped at the watchdog window.
    fn defer(&mut self, handle: &JobHandle, now: DateTime<Utc>, wait: Duration) {
        let wait = wait.min(self.config.watchdog_timeout);
        let until = chrono::Duration::from_std(wait)
            .ok()
            .and_then(|wait| now.checked_add_signed(wait));
        match until {
            Some(until) => {
                debug!(handle = %handle, retry_after_ms = wait.as_millis() as u64, "deferring poll");
                self.active.defer(handle, until);
            }
            None => warn!(handle = %handle, "retry-after out of range; not deferring"),
        }
    }

    async fn time_out(&mut self, handle: JobHandle) -> SchedulerResult<()> {
        let remote_id = self.poller.recover_remote_id(&handle).await;
        warn!(
            handle = %handle,
            remote_id = %remote_id,
            watchdog_secs = self.config.watchdog_timeout.as_secs(),
            "job exceeded watchdog; timing out"
        );
        self.finish(handle.clone(), TerminalOutcome::TimedOut { handle, remote_id })
    }

    /// Ledger first, then snapshot: a crash in between re-polls the job
    /// rather than losing its record.
    fn finish(&mut self, handle: JobHandle, outcome: TerminalOutcome) -> SchedulerResult<()> {
        self.ledger.record(&outcome)?;
        self.active.remove(&handle);
        self.stats.record(&outcome);
        self.persist()?;
        info!(
            handle = %handle,
            outcome = outcome.label(),
            active = self.active.len(),
            "job finished"
        );
        Ok(())
    }

    /// Pull the next batch into `pending`. Returns false when the queue is
    /// drained.
    ///
    /// A row repeating a job already pending is not submitted again; it is
    /// recorded as a submission failure so every withdrawn row has a record.
    fn refill(&mut self) -> SchedulerResult<bool> {
        let batch = self.queue.peek_batch(self.config.batch_size)?;
        if batch.is_empty() {
            if !self.drained {
                info!(active = self.active.len(), "queue drained");
                self.drained = true;
            }
            return Ok(false);
        }
        self.drained = false;

        let mut duplicates = Vec::new();
        for descriptor in batch.descriptors() {
            if self.pending.iter().any(|held| held.same_job(descriptor)) {
                duplicates.push(descriptor.clone());
            } else {
                self.pending.push_back(descriptor.clone());
            }
        }
        for duplicate in duplicates {
            warn!(
                payload = duplicate.payload(),
                "duplicate job in batch; recording it as not submitted"
            );
            let outcome = TerminalOutcome::SubmissionFailed(duplicate);
            self.ledger.record(&outcome)?;
            self.stats.record(&outcome);
        }

        // The snapshot must hold the batch before the queue forgets it.
        self.withdrawing = batch.descriptors().to_vec();
        self.persist()?;
        self.queue.commit(&batch)?;
        self.withdrawing.clear();
        self.persist()?;
        info!(pulled = batch.len(), pending = self.pending.len(), "refilled pending batch");
        Ok(true)
    }

    async fn fill_capacity(&mut self) -> SchedulerResult<()> {
        let mut refilled = false;
        while self.active.has_capacity(self.config.max_concurrent) {
            let Some(descriptor) = self.pending.front().cloned() else {
                if refilled || !self.refill()? {
                    break;
                }
                refilled = true;
                continue;
            };
            self.submit(descriptor).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, descriptor: JobDescriptor) -> SchedulerResult<()> {
        match self.gateway.submit(&descriptor).await {
            SubmitOutcome::Accepted { handle, attempts } => {
                self.stats.submitted += 1;
                if let Err(err) = self.active.insert(handle.clone(), self.clock.now()) {
                    error!(
                        handle = %handle,
                        payload = descriptor.payload(),
                        error = %err,
                        "remote returned an already active handle; job cannot be tracked"
                    );
                    let outcome = TerminalOutcome::SubmissionFailed(descriptor);
                    self.ledger.record(&outcome)?;
                    self.pending.pop_front();
                    self.stats.record(&outcome);
                    self.persist()?;
                    return Ok(());
                }
                self.pending.pop_front();
                self.persist()?;
                info!(
                    handle = %handle,
                    payload = descriptor.payload(),
                    attempts,
                    active = self.active.len(),
                    pending = self.pending.len(),
                    "job submitted"
                );
            }
            SubmitOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    payload = descriptor.payload(),
                    attempts,
                    error = %last_error,
                    "submission exhausted; abandoning job"
                );
                let outcome = TerminalOutcome::SubmissionFailed(descriptor);
                self.ledger.record(&outcome)?;
                self.pending.pop_front();
                self.stats.record(&outcome);
                self.persist()?;
                self.reauthenticate("submission exhausted").await?;
            }
        }
        Ok(())
    }

    async fn reauthenticate(&mut self, reason: &str) -> SchedulerResult<()> {
        self.stats.reauthentications += 1;
        info!(reason, "re-authenticating");
        self.session.authenticate().await?;
        Ok(())
    }

    fn persist(&self) -> SchedulerResult<()> {
        self.snapshots.save(&self.snapshot())?;
        Ok(())
    }

    fn log_progress(&mut self) {
        let idle = self.active.is_empty() && self.pending.is_empty() && self.drained;
        if idle && !self.idle {
            info!(stats = ?self.stats, "idle: nothing active, nothing pending, queue drained");
        } else if !idle {
            debug!(
                iteration = self.stats.iterations,
                active = self.active.len(),
                pending = self.pending.len(),
                submitted = self.stats.submitted,
                finished = self.stats.finished(),
                "iteration complete"
            );
        }
        self.idle = idle;
    }
}
