//! Metrics aggregator
//!
//! Periodic job: aggregates prototype statistics per OS, checks clustering
//! quality against the silhouette threshold, and detects drift via the
//! new-cluster rate over the detection window. Alerts go to the `alerts`
//! stream with `severity=warning`.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::analytics::cluster_metrics::distance_stats;
use crate::common::os::SUPPORTED_OSES;
use crate::pipeline::PipelineContext;

const METRICS_TTL_SECS: u64 = 7 * 24 * 3600;
const DRIFT_RATE_THRESHOLD: f64 = 0.15;

#[derive(Clone)]
pub struct MetricsAggregator {
    ctx: PipelineContext,
}

impl MetricsAggregator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> Result<()> {
        let interval = self.ctx.settings.metrics_aggregation_interval_sec;
        info!("starting metrics aggregator interval={}s", interval);

        while !self.ctx.shutdown.is_set() {
            for os_name in SUPPORTED_OSES {
                if let Err(e) = self.aggregate_os(os_name).await {
                    error!("metrics aggregation failed os={} err={:#}", os_name, e);
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval.max(1))).await;
        }
        Ok(())
    }

    async fn aggregate_os(&self, os_name: &str) -> Result<()> {
        let stats = self.aggregate_cluster_stats(os_name).await?;
        let stats_key = format!("cluster_metrics:aggregated:{os_name}:latest");
        self.ctx
            .broker
            .set_ex(&stats_key, &stats.to_string(), METRICS_TTL_SECS)
            .await?;

        let mut alerts = Vec::new();
        alerts.extend(self.check_quality_alerts(os_name).await);
        alerts.extend(self.check_drift_alerts(os_name).await);

        let alert_count = alerts.len();
        for alert in alerts {
            let fields: Vec<(String, String)> = alert
                .as_object()
                .map(|map| {
                    map.iter()
                        .map(|(k, v)| {
                            let value = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), value)
                        })
                        .collect()
                })
                .unwrap_or_default();
            match self
                .ctx
                .broker
                .append(&self.ctx.settings.alerts_stream, &fields)
                .await
            {
                Ok(_) => warn!(
                    "cluster metric alert type={} os={} message={}",
                    alert.get("type").and_then(serde_json::Value::as_str).unwrap_or(""),
                    os_name,
                    alert.get("message").and_then(serde_json::Value::as_str).unwrap_or(""),
                ),
                Err(e) => info!("metric alert publish failed os={} err={:#}", os_name, e),
            }
        }

        info!(
            "metrics aggregation complete os={} clusters={} alerts={}",
            os_name,
            stats.get("total_clusters").and_then(serde_json::Value::as_u64).unwrap_or(0),
            alert_count
        );
        Ok(())
    }

    /// Aggregate statistics about the current prototypes for an OS
    pub async fn aggregate_cluster_stats(&self, os_name: &str) -> Result<Value> {
        let collection = self
            .ctx
            .store
            .collection(&self.ctx.settings.proto_collection(os_name))
            .await?;
        let data = collection.get(None, None, None, &["metadatas"]).await?;
        let metas = data.metadatas;

        if metas.is_empty() {
            return Ok(json!({
                "os": os_name,
                "total_clusters": 0,
                "avg_size": 0,
                "labeled_clusters": 0,
            }));
        }

        let sizes: Vec<f64> = metas
            .iter()
            .map(|m| m.get("size").and_then(Value::as_f64).unwrap_or(1.0))
            .collect();
        let labeled = metas
            .iter()
            .filter(|m| {
                m.get("label")
                    .and_then(Value::as_str)
                    .map(|l| !l.is_empty() && l != "unknown")
                    .unwrap_or(false)
            })
            .count();
        let mut label_distribution: HashMap<String, usize> = HashMap::new();
        for meta in &metas {
            let label = meta
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *label_distribution.entry(label).or_insert(0) += 1;
        }
        let size_stats = distance_stats(&sizes);

        Ok(json!({
            "os": os_name,
            "total_clusters": metas.len(),
            "labeled_clusters": labeled,
            "unlabeled_clusters": metas.len() - labeled,
            "avg_size": (size_stats.mean * 100.0).round() / 100.0,
            "max_size": size_stats.max,
            "min_size": size_stats.min,
            "label_distribution": label_distribution,
        }))
    }

    /// Low-silhouette alert from the latest batch quality metrics
    async fn check_quality_alerts(&self, os_name: &str) -> Vec<Value> {
        let mut alerts = Vec::new();
        let quality = match self.ctx.tracker.get_quality_metrics(os_name).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!("failed to check quality alerts os={} err={:#}", os_name, e);
                return alerts;
            }
        };
        let Some(latest) = quality.first() else {
            return alerts;
        };
        let silhouette = latest
            .get("silhouette_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let threshold = self.ctx.settings.cluster_quality_threshold;
        if silhouette < threshold {
            alerts.push(json!({
                "type": "low_quality",
                "severity": "warning",
                "os": os_name,
                "message": format!(
                    "Silhouette score ({silhouette:.3}) below threshold ({threshold})"
                ),
                "timestamp": Utc::now().to_rfc3339(),
                "metric": "silhouette_score",
                "value": silhouette,
                "threshold": threshold,
            }));
        }
        alerts
    }

    /// High-drift alert when too many online assignments create new clusters
    async fn check_drift_alerts(&self, os_name: &str) -> Vec<Value> {
        let mut alerts = Vec::new();
        let window_hours = (self.ctx.settings.drift_detection_window_sec / 3600).max(1) as i64;
        let metrics = match self.ctx.tracker.get_online_metrics(os_name, window_hours).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!("failed to check drift alerts os={} err={:#}", os_name, e);
                return alerts;
            }
        };
        let total_new: i64 = metrics.iter().map(|m| m.new_clusters).sum();
        let total_assignments: i64 = metrics.iter().map(|m| m.total_assignments).sum();
        if total_assignments == 0 {
            return alerts;
        }
        if let Some(alert) = drift_alert(os_name, total_new, total_assignments) {
            alerts.push(alert);
        }
        alerts
    }
}

/// Build the drift alert when the new-cluster rate exceeds the threshold
pub fn drift_alert(os_name: &str, total_new: i64, total_assignments: i64) -> Option<Value> {
    if total_assignments <= 0 {
        return None;
    }
    let new_rate = total_new as f64 / total_assignments as f64;
    if new_rate <= DRIFT_RATE_THRESHOLD {
        return None;
    }
    Some(json!({
        "type": "high_drift",
        "severity": "warning",
        "os": os_name,
        "message": format!(
            "High new cluster rate: {:.1}% of logs creating new clusters",
            new_rate * 100.0
        ),
        "timestamp": Utc::now().to_rfc3339(),
        "metric": "new_cluster_rate",
        "value": new_rate,
        "threshold": DRIFT_RATE_THRESHOLD,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_alert_fires_above_threshold() {
        let alert = drift_alert("linux", 200, 1000).expect("should alert");
        assert_eq!(alert["type"], "high_drift");
        assert_eq!(alert["metric"], "new_cluster_rate");
        let value = alert["value"].as_f64().unwrap();
        assert!((value - 0.20).abs() < 1e-9);
        assert_eq!(alert["threshold"], 0.15);
    }

    #[test]
    fn test_drift_alert_quiet_below_threshold() {
        assert!(drift_alert("linux", 100, 1000).is_none());
        assert!(drift_alert("linux", 150, 1000).is_none());
        assert!(drift_alert("linux", 0, 0).is_none());
    }
}
