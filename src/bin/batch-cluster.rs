//! Offline prototype re-seeding
//!
//! Clusters the template collection (and an optional sample of logs) for one
//! or all OSes with the single-pass algorithm and upserts the resulting
//! prototypes. Optionally ingests Drain-style template CSVs first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log_sentinel::analytics::cluster_metrics::ClusterMetricsTracker;
use log_sentinel::analytics::failure_rules::FailureRules;
use log_sentinel::analytics::{clustering, templates};
use log_sentinel::common::os::SUPPORTED_OSES;
use log_sentinel::infra::broker::Broker;
use log_sentinel::infra::embedding::provider_from_settings;
use log_sentinel::{Settings, Shutdown, VectorStore};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "batch-cluster", about = "Re-seed cluster prototypes for an OS")]
struct Args {
    /// OS to cluster (default: all supported)
    #[arg(long)]
    os: Option<String>,

    /// Number of log rows to sample alongside the templates
    #[arg(long, default_value_t = 0)]
    include_logs_samples: usize,

    /// Override the cluster distance threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the minimum cluster size
    #[arg(long)]
    min_size: Option<usize>,

    /// Ingest template CSVs from this directory before clustering
    #[arg(long)]
    ingest_templates: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_sentinel=info,batch_cluster=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let embedder = provider_from_settings(&settings)?;
    let store = VectorStore::new(&settings, embedder);
    let broker = Broker::connect(&settings.redis_url).await?;
    let tracker = ClusterMetricsTracker::new(broker, settings.llm_cost_per_1k_tokens);
    let rules = Arc::new(FailureRules::load(&settings.failure_rules_path));
    let shutdown = Shutdown::new();

    if let Some(data_dir) = &args.ingest_templates {
        let report = templates::ingest_all_data_dir(&store, &settings, data_dir).await?;
        info!("template ingestion report: {:?}", report);
    }

    let oses: Vec<String> = match &args.os {
        Some(os) => vec![os.clone()],
        None => SUPPORTED_OSES.iter().map(|s| s.to_string()).collect(),
    };

    for os_name in oses {
        let report = clustering::cluster_os(
            &store,
            &settings,
            &rules,
            &tracker,
            &shutdown,
            &os_name,
            args.include_logs_samples,
            args.threshold,
            args.min_size,
        )
        .await?;
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}
