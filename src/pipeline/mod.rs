//! Streaming pipeline
//!
//! Every role (consumer, aggregator, enrichers, metrics aggregator,
//! automations, producer supervisor) is a single long-running task with
//! cooperative suspension at I/O. Crashed loops restart under exponential
//! backoff; the shared shutdown flag ends them cleanly.

pub mod aggregator;
pub mod automations;
pub mod cluster_enricher;
pub mod consumer;
pub mod enricher;
pub mod incidents;
pub mod metrics_aggregator;
pub mod normalizers;
pub mod producers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::analytics::cluster_metrics::ClusterMetricsTracker;
use crate::analytics::failure_rules::FailureRules;
use crate::analytics::online::OnlineClusterer;
use crate::common::config::Settings;
use crate::common::runtime::Shutdown;
use crate::infra::alerts::AlertStore;
use crate::infra::broker::Broker;
use crate::infra::embedding::provider_from_settings as embedding_from_settings;
use crate::infra::llm::{provider_from_settings as llm_from_settings, LlmService};
use crate::infra::sources::SourceRepository;
use crate::infra::vector_store::VectorStore;

/// Shared handles threaded through every pipeline role
#[derive(Clone)]
pub struct PipelineContext {
    pub settings: Arc<Settings>,
    pub broker: Broker,
    pub store: VectorStore,
    pub llm: LlmService,
    pub tracker: ClusterMetricsTracker,
    pub rules: Arc<FailureRules>,
    pub sources: Arc<dyn SourceRepository>,
    pub alerts: AlertStore,
    pub shutdown: Shutdown,
}

impl PipelineContext {
    /// Construct all clients once; they are safe for concurrent use
    pub async fn initialize(
        settings: Settings,
        sources: Arc<dyn SourceRepository>,
    ) -> Result<Self> {
        let broker = Broker::connect(&settings.redis_url).await?;
        let embedder = embedding_from_settings(&settings)?;
        let store = VectorStore::new(&settings, embedder);
        let llm = LlmService::new(llm_from_settings(&settings)?);
        let tracker = ClusterMetricsTracker::new(broker.clone(), settings.llm_cost_per_1k_tokens);
        let rules = Arc::new(FailureRules::load(&settings.failure_rules_path));
        let alerts = AlertStore::new(broker.clone(), &settings);
        Ok(Self {
            settings: Arc::new(settings),
            broker,
            store,
            llm,
            tracker,
            rules,
            sources,
            alerts,
            shutdown: Shutdown::new(),
        })
    }

    pub fn online_clusterer(&self) -> OnlineClusterer {
        OnlineClusterer::new(
            self.store.clone(),
            (*self.settings).clone(),
            self.tracker.clone(),
            self.shutdown.clone(),
        )
    }
}

/// Run a loop forever, restarting on failure with exponential backoff
/// (1s doubling to a 10s cap). Returns when the shutdown flag is set.
pub async fn supervise<F, Fut>(name: &'static str, shutdown: Shutdown, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut backoff = Duration::from_secs(1);
    loop {
        if shutdown.is_set() {
            info!("{name} stopped");
            return;
        }
        match task().await {
            Ok(()) => {
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                error!("{name} crashed err={e:#}; restarting in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(10));
            }
        }
    }
}

/// Main pipeline orchestrator: spawns the enabled roles and joins them on
/// shutdown.
pub struct Pipeline {
    ctx: PipelineContext,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            handles: Vec::new(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Spawn every enabled role
    pub fn start(&mut self) {
        let settings = self.ctx.settings.clone();
        info!("starting pipeline roles");

        {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let consumer = consumer::Consumer::new(ctx.clone());
                supervise("consumer", ctx.shutdown.clone(), move || {
                    let consumer = consumer.clone();
                    async move { consumer.run().await }
                })
                .await;
            }));
        }

        {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let aggregator = aggregator::IssuesAggregator::new(ctx.clone());
                supervise("issues aggregator", ctx.shutdown.clone(), move || {
                    let aggregator = aggregator.clone();
                    async move { aggregator.run().await }
                })
                .await;
            }));
        }

        if settings.enable_enricher {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let enricher = enricher::IssueEnricher::new(ctx.clone());
                supervise("enricher", ctx.shutdown.clone(), move || {
                    let enricher = enricher.clone();
                    async move { enricher.run().await }
                })
                .await;
            }));
        }

        if settings.enable_cluster_enricher {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let enricher = cluster_enricher::ClusterEnricher::new(ctx.clone());
                supervise("cluster enricher", ctx.shutdown.clone(), move || {
                    let enricher = enricher.clone();
                    async move { enricher.run().await }
                })
                .await;
            }));
        }

        if settings.enable_cluster_metrics {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let aggregator = metrics_aggregator::MetricsAggregator::new(ctx.clone());
                supervise("metrics aggregator", ctx.shutdown.clone(), move || {
                    let aggregator = aggregator.clone();
                    async move { aggregator.run().await }
                })
                .await;
            }));
        }

        if settings.enable_automations {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let automations = automations::Automations::new(ctx.clone());
                supervise("automations", ctx.shutdown.clone(), move || {
                    let automations = automations.clone();
                    async move { automations.run().await }
                })
                .await;
            }));
        }

        if settings.enable_producers {
            let ctx = self.ctx.clone();
            self.handles.push(tokio::spawn(async move {
                let manager = producers::ProducerManager::new(ctx.clone());
                supervise("producer manager", ctx.shutdown.clone(), move || {
                    let manager = manager.clone();
                    async move { manager.run().await }
                })
                .await;
            }));
        }
    }

    /// Cooperative shutdown: set the flag and wait for loops to exit.
    /// In-flight LLM/HTTP calls may be abandoned; unacked batches are
    /// re-delivered on restart.
    pub async fn shutdown(&mut self) {
        info!("shutting down pipeline");
        self.ctx.shutdown.trigger();
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                error!("pipeline role did not stop within 5s; abandoning");
            }
        }
        info!("pipeline shutdown complete");
    }
}
