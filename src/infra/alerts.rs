//! Alert store
//!
//! Alerts live on the `alerts` stream and are mirrored into `alert:<id>`
//! hashes with a TTL that controls visibility only. Persisting an alert
//! strips the TTL and records the id in a set; feedback swaps membership
//! between the correct/incorrect sets. Alerts are never deleted.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::common::config::Settings;
use crate::infra::broker::Broker;

#[derive(Debug, Error)]
pub enum AlertStoreError {
    #[error("alert not found: {0}")]
    NotFound(String),
}

/// A listed alert with its parsed result payload
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub os: String,
    pub issue_key: String,
    pub result: Value,
    pub persisted: bool,
}

/// Parse a `result` field; malformed JSON degrades to `{raw}` rather than
/// dropping the alert.
pub fn parse_result(raw: Option<&str>) -> Value {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Value::Object(Default::default());
    };
    if let Ok(value) = serde_json::from_str(raw) {
        return value;
    }
    // single-quoted payloads show up from older writers
    let cleaned = raw.replace('\'', "\"");
    serde_json::from_str(&cleaned).unwrap_or_else(|_| serde_json::json!({"raw": raw}))
}

#[derive(Clone)]
pub struct AlertStore {
    broker: Broker,
    stream: String,
    persisted_set: String,
    feedback_correct_set: String,
    feedback_incorrect_set: String,
    ttl_sec: u64,
}

impl AlertStore {
    pub fn new(broker: Broker, settings: &Settings) -> Self {
        Self {
            broker,
            stream: settings.alerts_stream.clone(),
            persisted_set: settings.alerts_persisted_set.clone(),
            feedback_correct_set: settings.alerts_feedback_correct_set.clone(),
            feedback_incorrect_set: settings.alerts_feedback_incorrect_set.clone(),
            ttl_sec: settings.alerts_ttl_sec,
        }
    }

    /// Publish an alert's stream fields and mirror them into a TTL hash.
    /// Returns the stream id.
    pub async fn publish(&self, fields: &[(String, String)]) -> Result<String> {
        let entry_id = self.broker.append(&self.stream, fields).await?;
        let key = format!("alert:{entry_id}");
        let mut to_store = fields.to_vec();
        to_store.push(("id".to_string(), entry_id.clone()));
        if let Err(e) = self.broker.hset_all(&key, &to_store).await {
            info!("failed to store alert hash id={} err={:#}", entry_id, e);
        } else if let Err(e) = self.broker.expire(&key, self.ttl_sec).await {
            info!("failed to expire alert hash id={} err={:#}", entry_id, e);
        }
        Ok(entry_id)
    }

    /// List alerts from the TTL window plus any persisted ones, newest first
    pub async fn list(&self, limit: usize) -> Result<Vec<StoredAlert>> {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let min_id = format!("{}-0", now_ms.saturating_sub(self.ttl_sec * 1000));

        let persisted_ids = self
            .broker
            .smembers(&self.persisted_set)
            .await
            .unwrap_or_default();

        let entries = self
            .broker
            .rev_range_count(&self.stream, "+", &min_id, limit)
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for entry in entries {
            seen.insert(entry.id.clone());
            out.push(stored_from_fields(
                &entry.id,
                &entry.fields,
                persisted_ids.contains(&entry.id),
            ));
        }

        // older persisted alerts outside the TTL window
        let remaining = limit.saturating_sub(out.len());
        if remaining > 0 && !persisted_ids.is_empty() {
            let mut candidates: Vec<&String> =
                persisted_ids.iter().filter(|id| !seen.contains(*id)).collect();
            candidates.sort_by(|a, b| b.cmp(a));
            for id in candidates.into_iter().take(remaining) {
                let data = self.broker.hgetall(&format!("alert:{id}")).await?;
                if data.is_empty() {
                    continue;
                }
                out.push(stored_from_fields(id, &data, true));
            }
        }

        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(limit);
        Ok(out)
    }

    /// Remove hash expiry and mark the alert persisted. Reconstructs the hash
    /// from the stream entry when the TTL already evicted it.
    pub async fn persist(&self, entry_id: &str) -> Result<()> {
        let key = format!("alert:{entry_id}");
        if !self.broker.exists(&key).await? {
            let Some(entry) = self.broker.entry(&self.stream, entry_id).await? else {
                return Err(AlertStoreError::NotFound(entry_id.to_string()).into());
            };
            let mut fields: Vec<(String, String)> = entry.fields.into_iter().collect();
            fields.push(("id".to_string(), entry_id.to_string()));
            self.broker.hset_all(&key, &fields).await?;
        }
        self.broker.persist(&key).await?;
        self.broker.sadd(&self.persisted_set, entry_id).await?;
        Ok(())
    }

    /// Record operator feedback (`correct` / `incorrect`) for an alert
    pub async fn feedback(&self, entry_id: &str, correct: bool) -> Result<()> {
        let key = format!("alert:{entry_id}");
        if !self.broker.exists(&key).await? {
            return Err(AlertStoreError::NotFound(entry_id.to_string()).into());
        }
        let value = if correct { "correct" } else { "incorrect" };
        self.broker.hset(&key, "feedback", value).await?;
        let (add_to, remove_from) = if correct {
            (&self.feedback_correct_set, &self.feedback_incorrect_set)
        } else {
            (&self.feedback_incorrect_set, &self.feedback_correct_set)
        };
        self.broker.sadd(add_to, entry_id).await?;
        self.broker.srem(remove_from, entry_id).await?;
        Ok(())
    }
}

fn stored_from_fields(id: &str, fields: &HashMap<String, String>, persisted: bool) -> StoredAlert {
    StoredAlert {
        id: id.to_string(),
        alert_type: fields.get("type").cloned().unwrap_or_default(),
        os: fields.get("os").cloned().unwrap_or_default(),
        issue_key: fields.get("issue_key").cloned().unwrap_or_default(),
        result: parse_result(fields.get("result").map(String::as_str)),
        persisted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_valid_json() {
        let value = parse_result(Some(r#"{"failure_type":"disk"}"#));
        assert_eq!(value["failure_type"], "disk");
    }

    #[test]
    fn test_parse_result_single_quotes_coerced() {
        let value = parse_result(Some(r#"{'failure_type': 'disk'}"#));
        assert_eq!(value["failure_type"], "disk");
    }

    #[test]
    fn test_parse_result_garbage_kept_raw() {
        let value = parse_result(Some("not json at all"));
        assert_eq!(value["raw"], "not json at all");
    }

    #[test]
    fn test_parse_result_empty() {
        assert!(parse_result(None).as_object().unwrap().is_empty());
        assert!(parse_result(Some("")).as_object().unwrap().is_empty());
    }
}
