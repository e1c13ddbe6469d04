//! Cluster quality metrics
//!
//! Silhouette, cohesion, and separation over batch clusterings; hour-bucketed
//! counters for online assignments and LLM calls. Everything is persisted in
//! the broker with a 7-day TTL.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::analytics::vectors::{cosine_distance, mean, normalize};
use crate::infra::broker::Broker;

const METRICS_TTL_SECS: u64 = 7 * 24 * 3600;

/// Mean silhouette score over points in clusters of size >= 2.
///
/// Per point: `a(i)` is the mean cosine distance to the other members of its
/// cluster, `b(i)` the minimum over other clusters of the mean distance to
/// that cluster's members; `s = (b-a)/max(a,b)` when `max(a,b) > 0` else 0.
pub fn silhouette_score(clusters: &[Vec<usize>], embeddings: &[Vec<f32>]) -> f64 {
    if clusters.len() < 2 {
        return 0.0;
    }
    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| normalize(e)).collect();

    let mut total_score = 0.0;
    let mut total_samples = 0usize;

    for (cluster_idx, members) in clusters.iter().enumerate() {
        if members.len() < 2 {
            continue;
        }
        for &member in members {
            let vec = &normalized[member];

            let intra: Vec<f64> = members
                .iter()
                .filter(|&&other| other != member)
                .map(|&other| cosine_distance(vec, &normalized[other]) as f64)
                .collect();
            let a_i = if intra.is_empty() {
                0.0
            } else {
                intra.iter().sum::<f64>() / intra.len() as f64
            };

            let mut min_inter = f64::INFINITY;
            for (other_idx, other_members) in clusters.iter().enumerate() {
                if other_idx == cluster_idx || other_members.is_empty() {
                    continue;
                }
                let sum: f64 = other_members
                    .iter()
                    .map(|&other| cosine_distance(vec, &normalized[other]) as f64)
                    .sum();
                min_inter = min_inter.min(sum / other_members.len() as f64);
            }
            let b_i = if min_inter.is_finite() { min_inter } else { 0.0 };

            let s_i = if a_i.max(b_i) > 0.0 {
                (b_i - a_i) / a_i.max(b_i)
            } else {
                0.0
            };
            total_score += s_i;
            total_samples += 1;
        }
    }

    if total_samples > 0 {
        total_score / total_samples as f64
    } else {
        0.0
    }
}

/// Mean pairwise intra-cluster cosine distance; lower is tighter
pub fn cohesion(clusters: &[Vec<usize>], embeddings: &[Vec<f32>]) -> f64 {
    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| normalize(e)).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for members in clusters {
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                total += cosine_distance(&normalized[a], &normalized[b]) as f64;
                pairs += 1;
            }
        }
    }
    if pairs > 0 {
        total / pairs as f64
    } else {
        0.0
    }
}

/// Mean pairwise cosine distance between cluster centroids; higher is better
pub fn separation(clusters: &[Vec<usize>], embeddings: &[Vec<f32>]) -> f64 {
    if clusters.len() < 2 {
        return 1.0;
    }
    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| normalize(e)).collect();
    let centroids: Vec<Vec<f32>> = clusters
        .iter()
        .filter(|members| !members.is_empty())
        .map(|members| {
            let member_vecs: Vec<&[f32]> =
                members.iter().map(|&i| normalized[i].as_slice()).collect();
            mean(&member_vecs)
        })
        .collect();
    if centroids.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..centroids.len() {
        for j in i + 1..centroids.len() {
            total += cosine_distance(&centroids[i], &centroids[j]) as f64;
            pairs += 1;
        }
    }
    if pairs > 0 {
        total / pairs as f64
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistanceStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

pub fn distance_stats(values: &[f64]) -> DistanceStats {
    if values.is_empty() {
        return DistanceStats::default();
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    DistanceStats {
        mean,
        std: variance.sqrt(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count,
    }
}

/// Hour-bucketed online clustering counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct OnlineHourMetrics {
    pub hour: String,
    pub total_assignments: i64,
    pub new_clusters: i64,
}

/// Hour-bucketed LLM usage counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmHourMetrics {
    pub hour: String,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub total_tokens: i64,
    pub total_latency_ms: f64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
}

/// Persists cluster metrics in the broker
#[derive(Clone)]
pub struct ClusterMetricsTracker {
    broker: Broker,
    llm_cost_per_1k_tokens: f64,
}

impl ClusterMetricsTracker {
    pub fn new(broker: Broker, llm_cost_per_1k_tokens: f64) -> Self {
        Self {
            broker,
            llm_cost_per_1k_tokens,
        }
    }

    fn hour_bucket() -> String {
        Utc::now().format("%Y-%m-%d-%H").to_string()
    }

    /// Record metrics from one batch clustering run
    pub async fn record_batch_clustering_metrics(
        &self,
        os_name: &str,
        clusters: &[Vec<usize>],
        embeddings: &[Vec<f32>],
        threshold: f32,
        min_size: usize,
    ) -> Result<Value> {
        // silhouette is O(n^2); keep it off the I/O scheduler
        let owned_clusters = clusters.to_vec();
        let owned_embeddings = embeddings.to_vec();
        let (silhouette, cohesion_value, separation_value) =
            tokio::task::spawn_blocking(move || {
                (
                    silhouette_score(&owned_clusters, &owned_embeddings),
                    cohesion(&owned_clusters, &owned_embeddings),
                    separation(&owned_clusters, &owned_embeddings),
                )
            })
            .await?;
        let sizes: Vec<f64> = clusters.iter().map(|c| c.len() as f64).collect();
        let size_stats = distance_stats(&sizes);

        let metrics = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "os": os_name,
            "type": "batch_clustering",
            "num_clusters": clusters.len(),
            "num_logs": embeddings.len(),
            "silhouette_score": silhouette,
            "cohesion": cohesion_value,
            "separation": separation_value,
            "threshold": threshold,
            "min_size": min_size,
            "cluster_size_mean": size_stats.mean,
            "cluster_size_std": size_stats.std,
            "cluster_size_min": size_stats.min,
            "cluster_size_max": size_stats.max,
        });

        let encoded = metrics.to_string();
        let key = format!(
            "cluster_metrics:batch:{}:{}",
            os_name,
            Utc::now().timestamp()
        );
        self.broker.set_ex(&key, &encoded, METRICS_TTL_SECS).await?;
        let latest_key = format!("cluster_metrics:latest:batch:{os_name}");
        self.broker
            .set_ex(&latest_key, &encoded, METRICS_TTL_SECS)
            .await?;

        info!(
            "batch clustering metrics os={} clusters={} silhouette={:.3} cohesion={:.3} separation={:.3}",
            os_name,
            clusters.len(),
            silhouette,
            cohesion_value,
            separation_value
        );
        Ok(metrics)
    }

    /// Record one online assignment (and new-cluster creation)
    pub async fn record_online_cluster_assignment(
        &self,
        os_name: &str,
        cluster_id: &str,
        distance: f64,
        is_new_cluster: bool,
    ) -> Result<()> {
        let hour = Self::hour_bucket();
        let hour_key = format!("cluster_metrics:online:{os_name}:{hour}");
        self.broker.hincr(&hour_key, "total_assignments", 1).await?;
        self.broker.expire(&hour_key, METRICS_TTL_SECS).await?;
        if is_new_cluster {
            self.broker.hincr(&hour_key, "new_clusters", 1).await?;
        }

        // distance distribution in a sorted set for percentile queries
        let distance_key = format!("cluster_metrics:distances:{os_name}:{hour}");
        let member = format!("{}:{}", Utc::now().to_rfc3339(), cluster_id);
        self.broker.zadd(&distance_key, &member, distance).await?;
        self.broker.expire(&distance_key, METRICS_TTL_SECS).await?;
        Ok(())
    }

    /// Record one LLM call with usage-derived cost
    pub async fn record_llm_call(
        &self,
        cluster_id: &str,
        confidence: Option<f64>,
        tokens_used: u64,
        latency_ms: f64,
        success: bool,
    ) -> Result<()> {
        let hour = Self::hour_bucket();
        let hour_key = format!("cluster_metrics:llm:{hour}");
        self.broker.hincr(&hour_key, "total_calls", 1).await?;
        self.broker
            .hincr_float(&hour_key, "total_tokens", tokens_used as f64)
            .await?;
        self.broker
            .hincr_float(&hour_key, "total_latency_ms", latency_ms)
            .await?;
        self.broker.expire(&hour_key, METRICS_TTL_SECS).await?;
        let outcome_field = if success {
            "successful_calls"
        } else {
            "failed_calls"
        };
        self.broker.hincr(&hour_key, outcome_field, 1).await?;

        if let Some(confidence) = confidence {
            let confidence_key = format!("cluster_metrics:llm:confidence:{hour}");
            let member = format!("{}:{}", Utc::now().to_rfc3339(), cluster_id);
            self.broker.zadd(&confidence_key, &member, confidence).await?;
            self.broker.expire(&confidence_key, METRICS_TTL_SECS).await?;
        }

        let cost = (tokens_used as f64 / 1000.0) * self.llm_cost_per_1k_tokens;
        self.broker
            .hincr_float(&hour_key, "total_cost_usd", cost)
            .await?;
        Ok(())
    }

    /// Batch quality metrics for an OS, most recent first
    pub async fn get_quality_metrics(&self, os_name: &str) -> Result<Vec<Value>> {
        let pattern = format!("cluster_metrics:batch:{os_name}:*");
        let keys = self.broker.scan_keys(&pattern).await?;
        let mut metrics = Vec::new();
        for key in keys {
            if let Some(raw) = self.broker.get(&key).await? {
                if let Ok(value) = serde_json::from_str::<Value>(&raw) {
                    metrics.push(value);
                }
            }
        }
        metrics.sort_by(|a, b| {
            let ts_a = a.get("timestamp").and_then(Value::as_str).unwrap_or("");
            let ts_b = b.get("timestamp").and_then(Value::as_str).unwrap_or("");
            ts_b.cmp(ts_a)
        });
        Ok(metrics)
    }

    /// Online metrics for the last N hour buckets (non-empty buckets only)
    pub async fn get_online_metrics(
        &self,
        os_name: &str,
        hours: i64,
    ) -> Result<Vec<OnlineHourMetrics>> {
        let now = Utc::now();
        let mut metrics = Vec::new();
        for offset in 0..hours.max(1) {
            let hour = (now - ChronoDuration::hours(offset))
                .format("%Y-%m-%d-%H")
                .to_string();
            let key = format!("cluster_metrics:online:{os_name}:{hour}");
            let data = self.broker.hgetall(&key).await?;
            if data.is_empty() {
                continue;
            }
            metrics.push(OnlineHourMetrics {
                hour,
                total_assignments: data
                    .get("total_assignments")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                new_clusters: data
                    .get("new_clusters")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            });
        }
        Ok(metrics)
    }

    /// LLM usage for the last N hour buckets (non-empty buckets only)
    pub async fn get_llm_metrics(&self, hours: i64) -> Result<Vec<LlmHourMetrics>> {
        let now = Utc::now();
        let mut metrics = Vec::new();
        for offset in 0..hours.max(1) {
            let hour = (now - ChronoDuration::hours(offset))
                .format("%Y-%m-%d-%H")
                .to_string();
            let key = format!("cluster_metrics:llm:{hour}");
            let data = self.broker.hgetall(&key).await?;
            if data.is_empty() {
                continue;
            }
            let total_calls: i64 = data
                .get("total_calls")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let total_latency_ms: f64 = data
                .get("total_latency_ms")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
            metrics.push(LlmHourMetrics {
                hour,
                total_calls,
                successful_calls: data
                    .get("successful_calls")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                failed_calls: data
                    .get("failed_calls")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                total_tokens: data
                    .get("total_tokens")
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0) as i64,
                total_latency_ms,
                total_cost_usd: data
                    .get("total_cost_usd")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0),
                avg_latency_ms: if total_calls > 0 {
                    total_latency_ms / total_calls as f64
                } else {
                    0.0
                },
            });
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tight_clusters() -> (Vec<Vec<usize>>, Vec<Vec<f32>>) {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.05],
            vec![0.0, 1.0],
            vec![0.05, 0.99],
        ];
        (vec![vec![0, 1], vec![2, 3]], embeddings)
    }

    #[test]
    fn test_silhouette_within_bounds() {
        let (clusters, embeddings) = two_tight_clusters();
        let score = silhouette_score(&clusters, &embeddings);
        assert!((-1.0..=1.0).contains(&score));
        // tight, well-separated clusters score high
        assert!(score > 0.8);
    }

    #[test]
    fn test_silhouette_single_cluster_is_zero() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.9, 0.1]];
        assert_eq!(silhouette_score(&[vec![0, 1]], &embeddings), 0.0);
    }

    #[test]
    fn test_silhouette_deterministic() {
        let (clusters, embeddings) = two_tight_clusters();
        let a = silhouette_score(&clusters, &embeddings);
        let b = silhouette_score(&clusters, &embeddings);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cohesion_lower_for_tighter_clusters() {
        let (clusters, embeddings) = two_tight_clusters();
        let tight = cohesion(&clusters, &embeddings);
        let loose_embeddings = vec![
            vec![1.0, 0.0],
            vec![0.5, 0.86],
            vec![0.0, 1.0],
            vec![-0.5, 0.86],
        ];
        let loose = cohesion(&clusters, &loose_embeddings);
        assert!(tight < loose);
    }

    #[test]
    fn test_separation_orthogonal_clusters() {
        let (clusters, embeddings) = two_tight_clusters();
        let sep = separation(&clusters, &embeddings);
        assert!(sep > 0.8);
        assert_eq!(separation(&clusters[..1].to_vec(), &embeddings), 1.0);
    }

    #[test]
    fn test_distance_stats() {
        let stats = distance_stats(&[1.0, 2.0, 3.0]);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.count, 3);
        assert!((stats.std - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_distance_stats_empty() {
        let stats = distance_stats(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
    }
}
