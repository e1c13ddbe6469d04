//! Issue enricher
//!
//! Consumes issue candidates, retrieves neighboring templates, amplifies
//! retrieval with HyDE queries, asks the LLM to classify, and publishes an
//! alert. Candidates are ACKed regardless of LLM outcome; a failed call still
//! produces an alert whose `result` carries `{error, raw}`.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::infra::vector_store::Neighbor;
use crate::pipeline::PipelineContext;
use crate::schemas::alerts::Alert;
use crate::schemas::logs::{CandidateLog, IssueCandidate};

pub const GROUP_NAME: &str = "issues_enrichers";
pub const CONSUMER_NAME: &str = "enricher_1";

const READ_COUNT: usize = 5;
const BLOCK_MS: usize = 1000;
const NEIGHBOR_K: usize = 8;
const LOGS_PER_QUERY: usize = 5;
const HYDE_QUERIES: usize = 3;

#[derive(Clone)]
pub struct IssueEnricher {
    ctx: PipelineContext,
}

impl IssueEnricher {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> Result<()> {
        let stream = self.ctx.settings.issues_candidates_stream.clone();
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
                    info!("enricher read failed err={:#}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for message in messages {
                let candidate = IssueCandidate::from_fields(&message.fields);
                if let Err(e) = self.enrich(&candidate).await {
                    info!("enricher processing failed id={} err={:#}", message.id, e);
                }
                if let Err(e) = self
                    .ctx
                    .broker
                    .ack(&stream, GROUP_NAME, &[message.id.clone()])
                    .await
                {
                    info!("enricher ack failed id={} err={:#}", message.id, e);
                }
            }
        }
        Ok(())
    }

    async fn enrich(&self, candidate: &IssueCandidate) -> Result<()> {
        let os_name = if candidate.os.is_empty() {
            "unknown".to_string()
        } else {
            candidate.os.clone()
        };
        let seed = if candidate.templated_summary.is_empty() {
            candidate
                .logs
                .first()
                .map(|l| l.templated.clone())
                .unwrap_or_default()
        } else {
            candidate.templated_summary.clone()
        };

        // coarse context from known templates
        let neighbors = self.retrieve_neighbors(&os_name, &seed, NEIGHBOR_K).await?;

        // HyDE amplification over the logs collection
        let (queries, hyde_outcome) = self
            .ctx
            .llm
            .generate_hypothesis(&os_name, &seed, &candidate.logs, HYDE_QUERIES)
            .await;
        self.record_llm(&candidate.issue_key, &hyde_outcome).await;
        let retrieved = self
            .retrieve_logs_by_queries(&os_name, &queries, LOGS_PER_QUERY)
            .await;

        let outcome = self
            .ctx
            .llm
            .classify_issue(&os_name, &candidate.logs, &neighbors, &retrieved)
            .await;
        self.record_llm(&candidate.issue_key, &outcome).await;

        let log_ids: Vec<String> = candidate
            .logs
            .iter()
            .filter(|l| !l.id.is_empty())
            .map(|l| l.id.clone())
            .collect();
        let alert = Alert::for_issue(&os_name, &candidate.issue_key, outcome.value, log_ids);
        let entry_id = self.ctx.alerts.publish(&alert.to_fields()).await?;
        info!(
            "alert published id={} os={} issue_key={} failure_type={}",
            entry_id, os_name, candidate.issue_key, alert.failure_type
        );
        Ok(())
    }

    async fn retrieve_neighbors(
        &self,
        os_name: &str,
        templated: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        if templated.is_empty() {
            return Ok(Vec::new());
        }
        let collection = self
            .ctx
            .store
            .collection(&self.ctx.settings.templates_collection(os_name))
            .await?;
        let result = collection
            .query_texts(
                &[templated.to_string()],
                k,
                None,
                &["distances", "metadatas", "documents"],
            )
            .await?;
        Ok(result.first_neighbors())
    }

    async fn retrieve_logs_by_queries(
        &self,
        os_name: &str,
        queries: &[String],
        k_per_query: usize,
    ) -> Vec<CandidateLog> {
        let mut out = Vec::new();
        if queries.is_empty() {
            return out;
        }
        let Ok(collection) = self
            .ctx
            .store
            .collection(&self.ctx.settings.logs_collection(os_name))
            .await
        else {
            return out;
        };
        for query in queries.iter().take(HYDE_QUERIES) {
            let Ok(result) = collection
                .query_texts(
                    &[query.clone()],
                    k_per_query,
                    None,
                    &["documents", "metadatas", "distances"],
                )
                .await
            else {
                continue;
            };
            for neighbor in result.first_neighbors() {
                out.push(CandidateLog {
                    templated: neighbor.document,
                    raw: neighbor
                        .metadata
                        .get("raw")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    ..Default::default()
                });
            }
        }
        out
    }

    async fn record_llm(&self, key: &str, outcome: &crate::infra::llm::ChatOutcome) {
        if !self.ctx.settings.enable_cluster_metrics || self.ctx.shutdown.is_set() {
            return;
        }
        let confidence = outcome
            .value
            .get("confidence")
            .and_then(serde_json::Value::as_f64);
        if let Err(e) = self
            .ctx
            .tracker
            .record_llm_call(
                key,
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
