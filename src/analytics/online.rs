//! Online single-pass clustering
//!
//! Assign a templated line to the nearest prototype within the threshold, or
//! mint a new provisional prototype seeded with the line itself. New-cluster
//! ids are `cluster_<12-hex>`; assignments and creations are recorded in the
//! cluster-metrics tracker unless the process is shutting down.

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analytics::cluster_metrics::ClusterMetricsTracker;
use crate::analytics::router::{nearest_prototype, pick_assignment};
use crate::common::config::Settings;
use crate::common::runtime::Shutdown;
use crate::infra::vector_store::VectorStore;

/// Outcome of one online assignment
#[derive(Debug, Clone)]
pub struct Assignment {
    pub cluster_id: String,
    pub distance: f32,
    pub is_new_cluster: bool,
}

pub struct OnlineClusterer {
    store: VectorStore,
    settings: Settings,
    tracker: ClusterMetricsTracker,
    shutdown: Shutdown,
}

impl OnlineClusterer {
    pub fn new(
        store: VectorStore,
        settings: Settings,
        tracker: ClusterMetricsTracker,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            settings,
            tracker,
            shutdown,
        }
    }

    /// Assign a log to the nearest prototype within the threshold or create a
    /// new one. The templated form drives clustering unless raw-log embedding
    /// is configured. Returns the cluster id.
    pub async fn assign_or_create(
        &self,
        os_name: &str,
        templated: &str,
        raw: &str,
        threshold: Option<f32>,
    ) -> Result<Assignment> {
        let threshold = threshold.unwrap_or(self.settings.online_cluster_distance_threshold);
        let text = if self.settings.embedding_use_raw_logs && !raw.is_empty() {
            raw
        } else {
            templated
        };

        let neighbors = match nearest_prototype(&self.store, &self.settings, os_name, text, 1).await
        {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("online clustering: prototype lookup failed os={} err={:#}", os_name, e);
                Vec::new()
            }
        };

        if let Some((cluster_id, distance)) = pick_assignment(&neighbors, threshold) {
            self.record(os_name, &cluster_id, distance, false).await;
            return Ok(Assignment {
                cluster_id,
                distance,
                is_new_cluster: false,
            });
        }

        // Seed a new prototype with this line as its medoid/centroid
        let cluster_id = format!("cluster_{}", &Uuid::new_v4().simple().to_string()[..12]);
        debug!(
            "online clustering: persisting prototype os={} cluster={} text_len={}",
            os_name,
            cluster_id,
            text.len()
        );
        let collection = self
            .store
            .collection(&self.settings.proto_collection(os_name))
            .await?;
        let mut metadata = Map::new();
        metadata.insert("os".to_string(), Value::String(os_name.to_string()));
        metadata.insert("label".to_string(), Value::String("unknown".to_string()));
        metadata.insert("rationale".to_string(), Value::String("online".to_string()));
        metadata.insert("size".to_string(), Value::from(1u64));
        metadata.insert(
            "created_by".to_string(),
            Value::String("online".to_string()),
        );
        metadata.insert(
            "embedding_mode".to_string(),
            Value::String(
                if self.settings.embedding_use_raw_logs {
                    "raw"
                } else {
                    "templated"
                }
                .to_string(),
            ),
        );
        if let Err(e) = collection
            .upsert(
                &[cluster_id.clone()],
                &[text.to_string()],
                None,
                vec![metadata],
            )
            .await
        {
            // The assignment is still usable; the prototype will be recreated
            // on the next unmatched line.
            warn!(
                "online clustering: failed to persist prototype os={} cluster={} err={:#}",
                os_name, cluster_id, e
            );
        }

        self.record(os_name, &cluster_id, 0.0, true).await;
        Ok(Assignment {
            cluster_id,
            distance: 0.0,
            is_new_cluster: true,
        })
    }

    /// Best-effort metrics recording; suppressed once shutdown is signalled
    async fn record(&self, os_name: &str, cluster_id: &str, distance: f32, is_new: bool) {
        if !self.settings.enable_cluster_metrics || self.shutdown.is_set() {
            return;
        }
        if let Err(e) = self
            .tracker
            .record_online_cluster_assignment(os_name, cluster_id, distance as f64, is_new)
            .await
        {
            debug!("online metrics recording failed: {e:#}");
        }
    }
}
