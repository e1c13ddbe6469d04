//! Producer plugins and their supervisor
//!
//! Producers are driven by the persisted data-source table: the manager
//! reconciles the enabled set against running instances, restarts crashed
//! producers with exponential backoff, and stops instances whose rows were
//! disabled or changed. Push-only kinds (telegraf) have no plugin here and
//! are ingested by an external HTTP endpoint.

pub mod filetail;
pub mod http_poller;
pub mod redfish;
pub mod snmp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::infra::broker::{Broker, LOGS_STREAM};
use crate::models::sources::DataSource;
use crate::pipeline::PipelineContext;
use crate::schemas::logs::LogRecord;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Append one record to the shared `logs` stream with at-least-once
/// semantics: wait for broker readiness, one reconnect retry on failure.
pub async fn emit(broker: &Broker, source: &str, line: &str, source_id: Option<i64>) -> Result<()> {
    let mut record = LogRecord::new(source, line);
    if let Some(id) = source_id {
        record = record.with_source_id(id);
    }
    broker
        .append_with_retry(LOGS_STREAM, &record.to_fields())
        .await?;
    Ok(())
}

/// Cooperative stop flag shared between a producer and its supervisor
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run until stopped; errors trigger a supervised restart
    async fn run(&self) -> Result<()>;

    fn stop(&self);
}

/// Whether a source type has a producer plugin; push-only kinds (telegraf)
/// are ingested elsewhere and must be skipped by the manager.
pub fn has_plugin(source_type: &str) -> bool {
    matches!(
        source_type,
        "filetail"
            | "snmp"
            | "redfish"
            | "dell_ome"
            | "dcim_http"
            | "thousandeyes"
            | "catalyst"
            | "splunk"
            | "datadog"
            | "squaredup"
            | "scom"
            | "bluecat"
    )
}

/// Instantiate the plugin for a source type; `None` for push-only kinds
pub fn build_producer(
    broker: Broker,
    source_id: i64,
    source_type: &str,
    config: &Value,
) -> Option<Arc<dyn Producer>> {
    match source_type {
        "filetail" => Some(Arc::new(filetail::FileTail::new(broker, source_id, config))),
        "snmp" => Some(Arc::new(snmp::SnmpProducer::new(broker, source_id, config))),
        "redfish" | "dell_ome" => Some(Arc::new(redfish::RedfishProducer::new(
            broker,
            source_id,
            source_type,
            config,
        ))),
        "dcim_http" | "thousandeyes" | "catalyst" | "splunk" | "datadog" | "squaredup"
        | "scom" | "bluecat" => Some(Arc::new(http_poller::HttpPoller::new(
            broker,
            source_id,
            source_type,
            config,
        ))),
        _ => None,
    }
}

struct RunningProducer {
    source_type: String,
    config_fingerprint: String,
    producer: Arc<dyn Producer>,
    handle: JoinHandle<()>,
}

/// Lifecycle manager for producer plugins
#[derive(Clone)]
pub struct ProducerManager {
    ctx: PipelineContext,
    running: Arc<DashMap<i64, RunningProducer>>,
}

impl ProducerManager {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    pub async fn run(&self) -> Result<()> {
        while !self.ctx.shutdown.is_set() {
            if let Err(e) = self.reconcile_all().await {
                warn!("producer reconcile failed err={:#}", e);
            }
            let active: Vec<String> = self
                .running
                .iter()
                .map(|entry| format!("{}:{}", entry.key(), entry.value().source_type))
                .collect();
            info!("producers active count={} set=[{}]", active.len(), active.join(", "));

            let mut waited = Duration::ZERO;
            while waited < RECONCILE_INTERVAL && !self.ctx.shutdown.is_set() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                waited += Duration::from_secs(1);
            }
        }
        self.stop_all().await;
        Ok(())
    }

    /// Diff the enabled source rows against running instances
    pub async fn reconcile_all(&self) -> Result<()> {
        let rows = self.ctx.sources.enabled_sources().await?;
        let active_ids: std::collections::HashSet<i64> = rows.iter().map(|r| r.id).collect();

        // stop removed rows
        let stale: Vec<i64> = self
            .running
            .iter()
            .filter(|entry| !active_ids.contains(entry.key()))
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            self.stop(id).await;
        }

        // restart changed rows, start new ones
        for row in rows {
            let fingerprint = row.config.to_string();
            let changed = self
                .running
                .get(&row.id)
                .map(|running| {
                    running.source_type != row.source_type
                        || running.config_fingerprint != fingerprint
                })
                .unwrap_or(false);
            if changed {
                self.stop(row.id).await;
            }
            if !self.running.contains_key(&row.id) {
                self.start(&row);
            }
        }
        Ok(())
    }

    /// Start a producer under a restart supervisor (1s doubling to 10s)
    fn start(&self, row: &DataSource) {
        let Some(producer) = build_producer(
            self.ctx.broker.clone(),
            row.id,
            &row.source_type,
            &row.config,
        ) else {
            info!("no producer plugin for type={}; skipping id={}", row.source_type, row.id);
            return;
        };

        let supervised = producer.clone();
        let shutdown = self.ctx.shutdown.clone();
        let source_id = row.id;
        let handle = tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match supervised.run().await {
                    Ok(()) => break,
                    Err(e) => {
                        if shutdown.is_set() {
                            break;
                        }
                        info!(
                            "producer id={} crashed err={:#}; restarting in {}s",
                            source_id,
                            e,
                            backoff.as_secs()
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(10));
                    }
                }
            }
        });

        self.running.insert(
            row.id,
            RunningProducer {
                source_type: row.source_type.clone(),
                config_fingerprint: row.config.to_string(),
                producer,
                handle,
            },
        );
        info!("started producer id={} type={}", row.id, row.source_type);
    }

    pub async fn stop(&self, source_id: i64) {
        if let Some((_, running)) = self.running.remove(&source_id) {
            running.producer.stop();
            running.handle.abort();
            info!("stopped producer id={}", source_id);
        }
    }

    async fn stop_all(&self) {
        let ids: Vec<i64> = self.running.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.stop(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_routing() {
        assert!(has_plugin("filetail"));
        assert!(has_plugin("snmp"));
        assert!(has_plugin("redfish"));
        assert!(has_plugin("thousandeyes"));
        // push-only: ingested by the HTTP endpoint, not a producer
        assert!(!has_plugin("telegraf"));
        assert!(!has_plugin("mystery"));
    }
}
