//! Log Sentinel service
//!
//! Hosts every pipeline role in one process: producers, consumer, issue
//! aggregator, enrichers, metrics aggregator, and automations. Shutdown is
//! cooperative: Ctrl-C sets the flag, loops exit at their next check, and
//! unacked batches are re-delivered on restart.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log_sentinel::infra::sources::{MemorySourceRepository, PgSourceRepository, SourceRepository};
use log_sentinel::pipeline::{Pipeline, PipelineContext};
use log_sentinel::Settings;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "log-sentinel", about = "Streaming log-analysis pipeline")]
struct Args {
    /// Run automations in dry-run mode regardless of configuration
    #[arg(long)]
    dry_run: bool,

    /// Verify the LLM provider before starting
    #[arg(long)]
    llm_healthcheck: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_sentinel=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting Log Sentinel v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::from_env()?;
    if args.dry_run {
        settings.automations_dry_run = true;
    }

    let sources: Arc<dyn SourceRepository> = match &settings.database_url {
        Some(url) => Arc::new(PgSourceRepository::connect(url).await?),
        None => {
            info!("no database_url configured; starting with an empty source set");
            Arc::new(MemorySourceRepository::default())
        }
    };

    let ctx = PipelineContext::initialize(settings, sources).await?;
    ctx.broker.wait_ready().await;
    info!("broker ready");

    if args.llm_healthcheck {
        ctx.llm.healthcheck().await;
    }

    let mut pipeline = Pipeline::new(ctx);
    pipeline.start();

    signal::ctrl_c().await?;
    info!("received shutdown signal");
    pipeline.shutdown().await;
    Ok(())
}
