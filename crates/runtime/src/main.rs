use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use homeflow_infra::PipelineConfig;
use homeflow_runtime::app::{App, RuntimeOptions};

/// Reads hub payloads (one JSON document per line) from stdin until EOF or
/// Ctrl-C, while the suggestion scheduler runs in the background.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    homeflow_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let options = RuntimeOptions::from_env()?;
    let app = App::build(config, &options)?;

    tracing::info!(connection_id = %options.connection_id, "reading hub events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => app.ingest_line(&line),
                Ok(None) => {
                    tracing::info!("input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
