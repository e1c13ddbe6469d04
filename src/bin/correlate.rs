//! Cross-source correlation report
//!
//! Computes global clusters (HDBSCAN over prototypes by default, single-pass
//! over logs as fallback/basis) and prints the result, optionally projected
//! onto a source/cluster graph.

use anyhow::Result;
use clap::Parser;
use log_sentinel::analytics::cross_correlation::{
    build_graph_from_clusters, global_correlation, CorrelationOptions,
};
use log_sentinel::infra::embedding::provider_from_settings;
use log_sentinel::{Settings, VectorStore};

#[derive(Debug, Parser)]
#[command(name = "correlate", about = "Cross-source cluster correlation")]
struct Args {
    /// "hdbscan" or "single_pass"
    #[arg(long, default_value = "hdbscan")]
    algorithm: String,

    /// "prototypes" or "logs"
    #[arg(long, default_value = "prototypes")]
    basis: String,

    #[arg(long, default_value_t = 200)]
    limit_per_source: usize,

    #[arg(long, default_value_t = 20)]
    include_logs_per_cluster: usize,

    #[arg(long, default_value_t = 5)]
    min_cluster_size: usize,

    #[arg(long)]
    min_samples: Option<usize>,

    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long)]
    min_size: Option<usize>,

    /// Print the graph projection instead of the raw clusters
    #[arg(long)]
    graph: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_sentinel=warn".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let embedder = provider_from_settings(&settings)?;
    let store = VectorStore::new(&settings, embedder);

    let options = CorrelationOptions {
        algorithm: args.algorithm,
        basis: args.basis,
        limit_per_source: args.limit_per_source,
        threshold: args.threshold,
        min_size: args.min_size,
        include_logs_per_cluster: args.include_logs_per_cluster,
        min_cluster_size: args.min_cluster_size,
        min_samples: args.min_samples,
    };
    let result = global_correlation(&store, &settings, &options).await?;
    if args.graph {
        println!("{}", serde_json::to_string_pretty(&build_graph_from_clusters(&result))?);
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
