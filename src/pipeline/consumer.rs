//! Log consumer
//!
//! Reads the `logs` stream in batches, routes metric-kind payloads through
//! normalization, and indexes everything else: parse + template, batched
//! per-collection upserts keyed by stream id, and per-line candidacy from
//! rule signals and nearest-prototype distance. Per-message failures are
//! logged and ACKed to avoid head-of-line blocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::analytics::router::nearest_prototype;
use crate::common::os::{infer_os, kind_of};
use crate::infra::broker::{StreamMessage, LOGS_STREAM};
use crate::parsers::parse_and_template;
use crate::pipeline::incidents;
use crate::pipeline::normalizers;
use crate::pipeline::PipelineContext;
use crate::schemas::logs::{CandidateLog, IssueCandidate, LogRecord};

pub const GROUP_NAME: &str = "log_consumers";
pub const CONSUMER_NAME: &str = "consumer_1";

const READ_COUNT: usize = 50;
const BLOCK_MS: usize = 1000;

/// Rows accumulated for one collection's batched upsert
#[derive(Default)]
struct PendingUpsert {
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<Map<String, Value>>,
}

/// Per-line candidate with its signal context
struct LineCandidate {
    candidate: IssueCandidate,
    rule_label: String,
    rule_score: f64,
    nearest_distance: Option<f32>,
    nearest_label: String,
}

/// Running consumer counters (snapshot via `stats`)
#[derive(Default)]
pub struct ConsumerStats {
    pub messages_processed: AtomicU64,
    pub metrics_normalized: AtomicU64,
    pub candidates_seen: AtomicU64,
    pub upsert_errors: AtomicU64,
    pub message_errors: AtomicU64,
}

#[derive(Clone)]
pub struct Consumer {
    ctx: PipelineContext,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub async fn run(&self) -> Result<()> {
        self.ctx.broker.create_group(LOGS_STREAM, GROUP_NAME).await?;
        info!(
            "consumer ready and entering read loop stream={} group={} consumer={}",
            LOGS_STREAM, GROUP_NAME, CONSUMER_NAME
        );

        while !self.ctx.shutdown.is_set() {
            let messages = match self
                .ctx
                .broker
                .read_group(LOGS_STREAM, GROUP_NAME, CONSUMER_NAME, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    info!("xreadgroup failed group={} err={:#}", GROUP_NAME, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }
            self.process_batch(messages).await;
        }
        Ok(())
    }

    async fn process_batch(&self, messages: Vec<StreamMessage>) {
        let mut batched: HashMap<String, PendingUpsert> = HashMap::new();
        let mut candidates: Vec<LineCandidate> = Vec::new();
        let mut ack_ids: Vec<String> = Vec::new();
        let total = messages.len();

        for message in messages {
            let id = message.id.clone();
            if let Err(e) = self
                .process_message(&message, &mut batched, &mut candidates)
                .await
            {
                self.stats.message_errors.fetch_add(1, Ordering::Relaxed);
                info!("consumer message processing failed id={} err={:#}", id, e);
            }
            ack_ids.push(id);
        }

        info!(
            "processing batch size={} collections={} candidates={}",
            total,
            batched.len(),
            candidates.len()
        );

        // Per-collection upserts; a failed collection is logged and skipped so
        // the rest of the batch still lands. Re-ingest is idempotent by id.
        for (collection_name, pending) in batched {
            let collection = match self.ctx.store.collection(&collection_name).await {
                Ok(c) => c,
                Err(e) => {
                    self.stats.upsert_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("upsert failed collection={} err={:#}", collection_name, e);
                    continue;
                }
            };
            if let Err(e) = collection
                .upsert(&pending.ids, &pending.documents, None, pending.metadatas)
                .await
            {
                self.stats.upsert_errors.fetch_add(1, Ordering::Relaxed);
                warn!("upsert failed collection={} err={:#}", collection_name, e);
            } else {
                info!(
                    "upserted collection={} count={}",
                    collection_name,
                    pending.ids.len()
                );
            }
        }

        if self.ctx.settings.enable_per_line_candidates {
            for line_candidate in candidates {
                let mut fields = line_candidate.candidate.to_fields();
                fields.push(("rule_label".to_string(), line_candidate.rule_label));
                fields.push((
                    "rule_score".to_string(),
                    line_candidate.rule_score.to_string(),
                ));
                fields.push((
                    "nearest_distance".to_string(),
                    line_candidate
                        .nearest_distance
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                ));
                fields.push(("nearest_label".to_string(), line_candidate.nearest_label));
                if let Err(e) = self
                    .ctx
                    .broker
                    .append(&self.ctx.settings.issues_candidates_stream, &fields)
                    .await
                {
                    info!("publish candidate failed err={:#}", e);
                }
            }
        }

        if let Err(e) = self.ctx.broker.ack(LOGS_STREAM, GROUP_NAME, &ack_ids).await {
            info!("ack failed count={} err={:#}", ack_ids.len(), e);
        } else {
            debug!("acked messages count={}", ack_ids.len());
        }
    }

    async fn process_message(
        &self,
        message: &StreamMessage,
        batched: &mut HashMap<String, PendingUpsert>,
        candidates: &mut Vec<LineCandidate>,
    ) -> Result<()> {
        self.stats.messages_processed.fetch_add(1, Ordering::Relaxed);
        let record = LogRecord::from_fields(&message.fields);
        let kind = kind_of(&record.source).to_string();

        // Metric-kind payloads: normalize, publish points and derived
        // incidents, then skip indexing.
        if self.ctx.settings.enable_metrics_normalization && normalizers::is_metric_kind(&kind) {
            if let Ok(payload) = serde_json::from_str::<Value>(&record.line) {
                if payload.is_object() {
                    self.handle_metric_payload(&kind, &record, &payload).await;
                    return Ok(());
                }
            }
        }

        // Basic incident derivation for Windows-management kinds even when
        // normalization is off; these lines still flow into indexing below.
        if !self.ctx.settings.enable_metrics_normalization
            && matches!(kind.as_str(), "scom" | "squaredup")
        {
            if let Ok(payload) = serde_json::from_str::<Value>(&record.line) {
                if payload.is_object() {
                    let mut derived =
                        incidents::derive_vendor_candidates(&kind, &payload, &record.line);
                    if derived.is_empty() {
                        derived.push(incidents::generic_candidate(&kind, &payload, &record.line));
                    }
                    for candidate in derived {
                        self.publish_incident(&kind, candidate).await;
                    }
                }
            }
        }

        let os_name = infer_os(&record.source);
        let (templated, parsed) = parse_and_template(&os_name, &record.line);

        let use_raw = self.ctx.settings.embedding_use_raw_logs;
        let doc_text = if use_raw {
            record.line.clone()
        } else {
            templated.clone()
        };

        let collection_name = self.ctx.settings.logs_collection(&os_name);
        let mut metadata = parsed.to_metadata();
        metadata.insert("os".to_string(), Value::String(os_name.clone()));
        metadata.insert("source".to_string(), Value::String(record.source.clone()));
        metadata.insert("raw".to_string(), Value::String(record.line.clone()));
        metadata.insert(
            "embedding_mode".to_string(),
            Value::String(if use_raw { "raw" } else { "templated" }.to_string()),
        );
        let pending = batched.entry(collection_name).or_default();
        pending.ids.push(message.id.clone());
        pending.documents.push(doc_text.clone());
        pending.metadatas.push(metadata);

        // candidacy: rule signal or distance beyond the nearest prototype
        let rule = self
            .ctx
            .rules
            .match_signals(&format!("{templated} {}", record.line));

        let mut distance = None;
        let mut nearest_label = String::new();
        match nearest_prototype(&self.ctx.store, &self.ctx.settings, &os_name, &doc_text, 1).await {
            Ok(neighbors) => {
                if let Some(nearest) = neighbors.first() {
                    distance = nearest.distance;
                    nearest_label = nearest
                        .metadata
                        .get("label")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                }
            }
            Err(e) => info!("prototype routing failed os={} err={:#}", os_name, e),
        }

        let far_from_prototypes = match distance {
            None => true,
            Some(d) => d > self.ctx.settings.nearest_proto_threshold,
        };
        if rule.has_signal || far_from_prototypes {
            self.stats.candidates_seen.fetch_add(1, Ordering::Relaxed);
            candidates.push(LineCandidate {
                candidate: IssueCandidate {
                    os: os_name,
                    issue_key: String::new(),
                    templated_summary: templated.clone(),
                    logs: vec![CandidateLog {
                        id: message.id.clone(),
                        templated,
                        raw: record.line.clone(),
                        component: parsed.component.clone(),
                        pid: parsed.pid.clone().unwrap_or_default(),
                        time: 0.0,
                    }],
                },
                rule_label: rule.label,
                rule_score: rule.score,
                nearest_distance: distance,
                nearest_label,
            });
        }
        Ok(())
    }

    /// Normalize a metric payload: publish points to the `metrics` stream and
    /// derive vendor incident candidates (with a generic fallback).
    async fn handle_metric_payload(&self, kind: &str, record: &LogRecord, payload: &Value) {
        // data-source config enrichment is best-effort
        let config = match record.source_id {
            Some(source_id) => match self.ctx.sources.source_by_id(source_id).await {
                Ok(Some(source)) => source.config,
                Ok(None) => Value::Object(Default::default()),
                Err(e) => {
                    debug!("source lookup failed id={} err={:#}", source_id, e);
                    Value::Object(Default::default())
                }
            },
            None => Value::Object(Default::default()),
        };

        let points = normalizers::normalize(kind, payload, &config);
        if points.is_empty() {
            return;
        }
        info!("consumer: normalized metrics kind={} points={}", kind, points.len());
        self.stats
            .metrics_normalized
            .fetch_add(points.len() as u64, Ordering::Relaxed);
        for point in &points {
            if let Err(e) = self
                .ctx
                .broker
                .append(&self.ctx.settings.metrics_stream, &point.to_fields())
                .await
            {
                info!("metrics publish failed kind={} name={} err={:#}", kind, point.name, e);
            }
        }

        // incident candidates derived from the normalized telemetry
        let mut derived = incidents::derive_vendor_candidates(kind, payload, &record.line);
        if derived.is_empty() {
            derived.push(incidents::generic_candidate(kind, payload, &record.line));
        }
        for candidate in derived {
            self.publish_incident(kind, candidate).await;
        }
    }

    async fn publish_incident(&self, kind: &str, candidate: IssueCandidate) {
        match self
            .ctx
            .broker
            .append(
                &self.ctx.settings.issues_candidates_stream,
                &candidate.to_fields(),
            )
            .await
        {
            Ok(entry_id) => info!(
                "incident published id={} kind={} os={}",
                entry_id, kind, candidate.os
            ),
            Err(e) => info!("incident publish failed kind={} err={:#}", kind, e),
        }
    }
}
