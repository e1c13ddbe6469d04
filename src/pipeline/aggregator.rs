//! Issue aggregator
//!
//! Independent consumer group over the same `logs` stream (the base consumer
//! owns acking there; this group keeps its own cursor). Groups logs into
//! in-memory issues keyed by (OS, component, PID), drives online cluster
//! assignment, and flushes idle issues onto the issues stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::common::os::infer_os;
use crate::infra::broker::LOGS_STREAM;
use crate::parsers::parse_and_template;
use crate::pipeline::PipelineContext;
use crate::schemas::alerts::ClusterCandidate;
use crate::schemas::logs::{CandidateLog, IssueCandidate, ParsedLog};

pub const GROUP_NAME: &str = "issues_aggregator";
pub const CONSUMER_NAME: &str = "aggregator_1";

const READ_COUNT: usize = 100;
const BLOCK_MS: usize = 1000;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Issue key: `os|component|pid` with `nopid` standing in for missing PIDs
pub fn issue_key(os_name: &str, parsed: &ParsedLog) -> String {
    let component = parsed.component.trim().to_lowercase();
    let pid = parsed
        .pid
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("nopid");
    format!("{os_name}|{component}|{pid}")
}

#[derive(Debug, Clone)]
pub struct IssueLog {
    pub id: String,
    pub raw: String,
    pub templated: String,
    pub parsed: ParsedLog,
    pub ts: f64,
}

/// An open issue. Born on the first message for its key, mutated only by the
/// aggregator, destroyed after flush.
#[derive(Debug, Clone)]
pub struct Issue {
    pub os: String,
    pub key: String,
    pub created_at: f64,
    pub last_seen_at: f64,
    pub logs: Vec<IssueLog>,
}

impl Issue {
    pub fn new(os: &str, key: &str, now: f64) -> Self {
        Self {
            os: os.to_string(),
            key: key.to_string(),
            created_at: now,
            last_seen_at: now,
            logs: Vec::new(),
        }
    }

    pub fn add_log(
        &mut self,
        id: String,
        raw: String,
        templated: String,
        parsed: ParsedLog,
        now: f64,
    ) {
        self.logs.push(IssueLog {
            id,
            raw,
            templated,
            parsed,
            ts: now,
        });
        self.last_seen_at = now;
    }

    /// Cap by insertion order; later logs are dropped
    pub fn top_logs(&self, limit: usize) -> &[IssueLog] {
        &self.logs[..self.logs.len().min(limit)]
    }

    pub fn is_idle(&self, now: f64, inactivity_sec: f64) -> bool {
        now - self.last_seen_at >= inactivity_sec
    }

    /// Serialize into an issue candidate, capped to `limit` logs
    pub fn to_candidate(&self, limit: usize) -> IssueCandidate {
        let top = self.top_logs(limit);
        IssueCandidate {
            os: self.os.clone(),
            issue_key: self.key.clone(),
            templated_summary: top
                .iter()
                .map(|l| l.templated.as_str())
                .collect::<Vec<_>>()
                .join(" \n"),
            logs: top
                .iter()
                .map(|l| CandidateLog {
                    id: l.id.clone(),
                    templated: l.templated.clone(),
                    raw: l.raw.clone(),
                    component: l.parsed.component.clone(),
                    pid: l.parsed.pid.clone().unwrap_or_default(),
                    time: l.ts,
                })
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct IssuesAggregator {
    ctx: PipelineContext,
    // single-writer map; survives loop restarts
    issues: Arc<Mutex<HashMap<String, Issue>>>,
}

impl IssuesAggregator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            issues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn open_issue_count(&self) -> usize {
        self.issues.lock().len()
    }

    pub async fn run(&self) -> Result<()> {
        self.ctx.broker.create_group(LOGS_STREAM, GROUP_NAME).await?;
        let inactivity = self.ctx.settings.issue_inactivity_sec;
        let clusterer = self.ctx.online_clusterer();
        info!(
            "starting issues aggregator stream={} group={} consumer={}",
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

            let now = now_secs();
            if !messages.is_empty() {
                let mut processed = 0usize;
                for message in &messages {
                    processed += 1;
                    let source = message.fields.get("source").cloned().unwrap_or_default();
                    let raw = message.fields.get("line").cloned().unwrap_or_default();
                    let os_name = infer_os(&source);
                    let (templated, parsed) = parse_and_template(&os_name, &raw);

                    // online assign/create for this log
                    let cluster_id = match clusterer
                        .assign_or_create(&os_name, &templated, &raw, None)
                        .await
                    {
                        Ok(assignment) => assignment.cluster_id,
                        Err(e) => {
                            debug!("online assignment failed os={} err={:#}", os_name, e);
                            String::new()
                        }
                    };

                    // best-effort: stamp cluster_id onto the logs row; the
                    // consumer may not have upserted it yet
                    if !cluster_id.is_empty() {
                        self.stamp_cluster_id(&os_name, &message.id, &cluster_id).await;
                        self.track_cluster_count(&os_name, &cluster_id).await;
                    }

                    let key = issue_key(&os_name, &parsed);
                    let mut issues = self.issues.lock();
                    let issue = issues
                        .entry(key.clone())
                        .or_insert_with(|| Issue::new(&os_name, &key, now));
                    issue.add_log(message.id.clone(), raw, templated, parsed, now);
                    // No ack here: the base consumer owns acking on its own
                    // group; this group's cursor advances independently.
                }
                debug!(
                    "aggregated messages={} open_issues={}",
                    processed,
                    self.issues.lock().len()
                );
            }

            self.flush_idle(now, inactivity).await;
        }
        Ok(())
    }

    /// Update the `logs_<os>` row metadata with the assignment; silent when
    /// the row has not been persisted yet.
    async fn stamp_cluster_id(&self, os_name: &str, stream_id: &str, cluster_id: &str) {
        let Ok(collection) = self
            .ctx
            .store
            .collection(&self.ctx.settings.logs_collection(os_name))
            .await
        else {
            return;
        };
        let ids = vec![stream_id.to_string()];
        let Ok(current) = collection.get(Some(&ids), None, None, &["metadatas"]).await else {
            return;
        };
        let Some(mut metadata) = current.metadatas.into_iter().next() else {
            return;
        };
        if metadata.is_empty() {
            return;
        }
        metadata.insert(
            "cluster_id".to_string(),
            Value::String(cluster_id.to_string()),
        );
        let _ = collection.update_metadatas(&ids, vec![metadata]).await;
    }

    /// Track per-cluster sizes; publish a cluster candidate exactly when the
    /// post-increment count equals the classification threshold.
    async fn track_cluster_count(&self, os_name: &str, cluster_id: &str) {
        let counter_key = format!("cluster:count:{os_name}:{cluster_id}");
        match self.ctx.broker.incr(&counter_key).await {
            Ok(count) => {
                if count == self.ctx.settings.cluster_min_logs_for_classification {
                    let candidate = ClusterCandidate {
                        os: os_name.to_string(),
                        cluster_id: cluster_id.to_string(),
                    };
                    match self
                        .ctx
                        .broker
                        .append(
                            &self.ctx.settings.clusters_candidates_stream,
                            &candidate.to_fields(),
                        )
                        .await
                    {
                        Ok(_) => info!(
                            "cluster candidate published os={} cluster={} count={}",
                            os_name, cluster_id, count
                        ),
                        Err(e) => info!(
                            "cluster candidate publish failed os={} cluster={} err={:#}",
                            os_name, cluster_id, e
                        ),
                    }
                }
            }
            Err(e) => debug!("cluster counter incr failed key={} err={:#}", counter_key, e),
        }
    }

    /// Publish and drop issues idle for at least the inactivity window
    async fn flush_idle(&self, now: f64, inactivity_sec: f64) {
        let to_close: Vec<Issue> = {
            let mut issues = self.issues.lock();
            let keys: Vec<String> = issues
                .iter()
                .filter(|(_, issue)| issue.is_idle(now, inactivity_sec))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| issues.remove(key)).collect()
        };

        for issue in to_close {
            let candidate = issue.to_candidate(self.ctx.settings.issue_max_logs_for_llm);
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
                    "published issue id={} os={} key={} logs={}",
                    entry_id,
                    issue.os,
                    issue.key,
                    issue.logs.len()
                ),
                Err(e) => info!(
                    "issue publish failed os={} key={} err={:#}",
                    issue.os, issue.key, e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(component: &str, pid: Option<&str>) -> ParsedLog {
        ParsedLog {
            component: component.to_string(),
            pid: pid.map(str::to_string),
            content: "content".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_key_shapes() {
        assert_eq!(
            issue_key("linux", &parsed("sshd", Some("1234"))),
            "linux|sshd|1234"
        );
        assert_eq!(
            issue_key("linux", &parsed(" SSHD ", None)),
            "linux|sshd|nopid"
        );
    }

    #[test]
    fn test_issue_lifecycle_and_idle() {
        let mut issue = Issue::new("linux", "linux|sshd|1", 100.0);
        issue.add_log("1-0".into(), "raw".into(), "templated".into(), parsed("sshd", Some("1")), 100.0);
        issue.add_log("2-0".into(), "raw2".into(), "templated2".into(), parsed("sshd", Some("1")), 105.0);
        assert_eq!(issue.last_seen_at, 105.0);
        assert!(issue.last_seen_at >= issue.created_at);
        assert!(!issue.is_idle(110.0, 30.0));
        assert!(issue.is_idle(135.0, 30.0));
    }

    #[test]
    fn test_zero_inactivity_flushes_immediately() {
        let mut issue = Issue::new("linux", "k", 100.0);
        issue.add_log("1-0".into(), "r".into(), "t".into(), parsed("c", None), 100.0);
        assert!(issue.is_idle(100.0, 0.0));
    }

    #[test]
    fn test_candidate_caps_logs_by_insertion_order() {
        let mut issue = Issue::new("linux", "linux|sshd|1", 0.0);
        for i in 0..10 {
            issue.add_log(
                format!("{i}-0"),
                format!("raw {i}"),
                format!("templated {i}"),
                parsed("sshd", Some("1")),
                i as f64,
            );
        }
        let candidate = issue.to_candidate(3);
        assert_eq!(candidate.logs.len(), 3);
        assert_eq!(candidate.logs[0].raw, "raw 0");
        assert_eq!(candidate.logs[2].raw, "raw 2");
        assert_eq!(
            candidate.templated_summary,
            "templated 0 \ntemplated 1 \ntemplated 2"
        );
    }
}
