use anyhow::{Context, bail};

use simflow_core::SettingsGrid;
use simflow_infra::{AppConfig, DataPaths, QueueStore};
use simflow_runner::seed;

const USAGE: &str = "usage: simflow [run] | simflow seed <payload-file>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simflow_observability::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("run") => {
            let config = AppConfig::from_env().context("loading configuration")?;
            simflow_runner::run(config).await?;
        }
        Some("seed") => {
            let file = args.next().context(USAGE)?;
            let queue = QueueStore::new(DataPaths::from_env().queue);
            let payloads = seed::read_payloads(&file)?;
            let written =
                seed::seed_queue(&queue, &SettingsGrid::fast_expression_defaults(), payloads)?;
            tracing::info!(written, queue = %queue.path().display(), "queue seeded");
        }
        Some(other) => bail!("unknown command {other:?}; {USAGE}"),
    }
    Ok(())
}
