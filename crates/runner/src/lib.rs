//! `simflow` runner: wires configuration, the HTTP remote service and the
//! scheduler into a process with Ctrl-C shutdown.

pub mod seed;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::info;

use simflow_core::SchedulerStats;
use simflow_infra::{AppConfig, HttpRemoteService, Scheduler};

/// Run the scheduler until Ctrl-C or a fatal error.
pub async fn run(config: AppConfig) -> anyhow::Result<SchedulerStats> {
    let remote = HttpRemoteService::new(&config.remote).context("building HTTP client")?;
    let mut scheduler = Scheduler::open(config.scheduler, &config.paths, Arc::new(remote))
        .context("restoring scheduler state")?;

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping after the current iteration");
            signal.notify_one();
        }
    });

    let stats = scheduler.run(shutdown).await?;
    info!(
        submitted = stats.submitted,
        completed = stats.completed,
        submission_failed = stats.submission_failed,
        run_failed = stats.run_failed,
        timed_out = stats.timed_out,
        "run finished"
    );
    Ok(stats)
}
