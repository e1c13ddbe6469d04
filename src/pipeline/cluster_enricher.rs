//! Cluster enricher
//!
//! Consumes cluster candidates emitted when a cluster's running counter
//! reaches the classification threshold. Loads the prototype, retrieves
//! centroid neighbors and cluster-scoped logs, classifies via the LLM, and
//! writes the learned label back onto the prototype.

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::infra::vector_store::Neighbor;
use crate::pipeline::PipelineContext;
use crate::schemas::alerts::{Alert, ClusterCandidate};
use crate::schemas::logs::CandidateLog;

pub const GROUP_NAME: &str = "clusters_enrichers";
pub const CONSUMER_NAME: &str = "cluster_enricher_1";

const READ_COUNT: usize = 5;
const BLOCK_MS: usize = 1000;
const NEIGHBOR_K: usize = 8;
const LOGS_PER_QUERY: usize = 10;
const HYDE_QUERIES: usize = 3;

#[derive(Clone)]
pub struct ClusterEnricher {
    ctx: PipelineContext,
}

impl ClusterEnricher {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> Result<()> {
        let stream = self.ctx.settings.clusters_candidates_stream.clone();
        self.ctx.broker.create_group(&stream, GROUP_NAME).await?;

        while !self.ctx.shutdown.is_set() {
            let messages = match self
                .ctx
                .broker
                .read_group(&stream, GROUP_NAME, CONSUMER_NAME, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    info!("cluster enricher read failed err={:#}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for message in messages {
                let candidate = ClusterCandidate::from_fields(&message.fields);
                if let Err(e) = self.enrich(&candidate).await {
                    info!(
                        "cluster enricher processing failed id={} err={:#}",
                        message.id, e
                    );
                }
                if let Err(e) = self
                    .ctx
                    .broker
                    .ack(&stream, GROUP_NAME, &[message.id.clone()])
                    .await
                {
                    info!("cluster enricher ack failed id={} err={:#}", message.id, e);
                }
            }
        }
        Ok(())
    }

    async fn enrich(&self, candidate: &ClusterCandidate) -> Result<()> {
        let os_name = if candidate.os.is_empty() {
            "unknown".to_string()
        } else {
            candidate.os.clone()
        };
        if candidate.cluster_id.is_empty() {
            return Ok(());
        }

        let (centroid, medoid_document, proto_metadata) =
            self.load_prototype(&os_name, &candidate.cluster_id).await?;

        // neighbors from templates via the centroid
        let mut neighbors: Vec<Neighbor> = Vec::new();
        if let Some(centroid) = &centroid {
            let templates = self
                .ctx
                .store
                .collection(&self.ctx.settings.templates_collection(&os_name))
                .await?;
            let result = templates
                .query_embeddings(
                    &[centroid.clone()],
                    NEIGHBOR_K,
                    None,
                    &["documents", "metadatas", "distances"],
                )
                .await?;
            neighbors = result.first_neighbors();
        }

        // HyDE queries seeded by the medoid
        let seed_logs: Vec<CandidateLog> = if medoid_document.is_empty() {
            Vec::new()
        } else {
            vec![CandidateLog {
                templated: medoid_document.clone(),
                ..Default::default()
            }]
        };
        let (queries, hyde_outcome) = self
            .ctx
            .llm
            .generate_hypothesis(&os_name, &medoid_document, &seed_logs, HYDE_QUERIES)
            .await;
        self.record_llm(&candidate.cluster_id, &hyde_outcome).await;

        // retrieve logs restricted to this cluster
        let retrieved = self
            .retrieve_cluster_logs(
                &os_name,
                &candidate.cluster_id,
                if queries.is_empty() {
                    vec![medoid_document.clone()]
                } else {
                    queries
                },
            )
            .await;

        let outcome = self
            .ctx
            .llm
            .classify_cluster(
                &os_name,
                &candidate.cluster_id,
                &medoid_document,
                &neighbors,
                &retrieved,
            )
            .await;
        self.record_llm(&candidate.cluster_id, &outcome).await;

        let alert = Alert::for_cluster(&os_name, &candidate.cluster_id, outcome.value.clone());
        let entry_id = self.ctx.alerts.publish(&alert.to_fields()).await?;
        info!(
            "cluster alert published id={} os={} cluster={} failure_type={}",
            entry_id, os_name, candidate.cluster_id, alert.failure_type
        );

        // write the learned label back onto the prototype
        self.update_prototype_label(&os_name, &candidate.cluster_id, proto_metadata, &outcome.value)
            .await;
        Ok(())
    }

    async fn load_prototype(
        &self,
        os_name: &str,
        cluster_id: &str,
    ) -> Result<(Option<Vec<f32>>, String, Map<String, Value>)> {
        let collection = self
            .ctx
            .store
            .collection(&self.ctx.settings.proto_collection(os_name))
            .await?;
        let ids = vec![cluster_id.to_string()];
        let data = collection
            .get(Some(&ids), None, None, &["embeddings", "documents", "metadatas"])
            .await?;
        Ok((
            data.embeddings.into_iter().next(),
            data.documents.into_iter().next().unwrap_or_default(),
            data.metadatas.into_iter().next().unwrap_or_default(),
        ))
    }

    async fn retrieve_cluster_logs(
        &self,
        os_name: &str,
        cluster_id: &str,
        queries: Vec<String>,
    ) -> Vec<CandidateLog> {
        let mut out = Vec::new();
        let Ok(collection) = self
            .ctx
            .store
            .collection(&self.ctx.settings.logs_collection(os_name))
            .await
        else {
            return out;
        };
        for query in queries.into_iter().filter(|q| !q.is_empty()).take(HYDE_QUERIES) {
            let Ok(result) = collection
                .query_texts(
                    &[query],
                    LOGS_PER_QUERY,
                    Some(json!({"cluster_id": cluster_id})),
                    &["documents", "metadatas", "distances"],
                )
                .await
            else {
                continue;
            };
            for neighbor in result.first_neighbors() {
                out.push(CandidateLog {
                    id: neighbor.id,
                    templated: neighbor.document,
                    raw: neighbor
                        .metadata
                        .get("raw")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    ..Default::default()
                });
            }
        }
        out
    }

    async fn update_prototype_label(
        &self,
        os_name: &str,
        cluster_id: &str,
        mut metadata: Map<String, Value>,
        result: &Value,
    ) {
        let Ok(collection) = self
            .ctx
            .store
            .collection(&self.ctx.settings.proto_collection(os_name))
            .await
        else {
            return;
        };
        let failure_type = result
            .get("failure_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if !failure_type.is_empty() {
            metadata.insert("label".to_string(), Value::String(failure_type));
        }
        metadata.insert(
            "rationale".to_string(),
            Value::String("llm_cluster".to_string()),
        );
        if let Some(recommendation) = result.get("recommendation").and_then(Value::as_str) {
            if !recommendation.is_empty() {
                metadata.insert(
                    "solution".to_string(),
                    Value::String(recommendation.to_string()),
                );
            }
        }
        if let Err(e) = collection
            .update_metadatas(&[cluster_id.to_string()], vec![metadata])
            .await
        {
            info!(
                "prototype label update failed os={} cluster={} err={:#}",
                os_name, cluster_id, e
            );
        }
    }

    async fn record_llm(&self, cluster_id: &str, outcome: &crate::infra::llm::ChatOutcome) {
        if !self.ctx.settings.enable_cluster_metrics || self.ctx.shutdown.is_set() {
            return;
        }
        let confidence = outcome.value.get("confidence").and_then(Value::as_f64);
        if let Err(e) = self
            .ctx
            .tracker
            .record_llm_call(
                cluster_id,
                confidence,
                outcome.tokens_used,
                outcome.latency_ms,
                outcome.success,
            )
            .await
        {
            tracing::debug!("llm metrics recording failed err={:#}", e);
        }
    }
}
