//! Log payloads on the broker streams
//!
//! Stream field values are always strings; nested structures (issue logs)
//! travel as JSON-encoded fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw log record as appended to the `logs` stream by producers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Source name; everything before the first `:` is the producer kind
    pub source: String,
    /// Raw line or JSON payload
    pub line: String,
    /// Foreign key to the data-source row that produced this record
    pub source_id: Option<i64>,
}

impl LogRecord {
    pub fn new(source: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line: line.into(),
            source_id: None,
        }
    }

    pub fn with_source_id(mut self, source_id: i64) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Encode as flat stream fields
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("source".to_string(), self.source.clone()),
            ("line".to_string(), self.line.clone()),
        ];
        if let Some(id) = self.source_id {
            fields.push(("source_id".to_string(), id.to_string()));
        }
        fields
    }

    /// Decode from stream fields; tolerates missing fields
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            source: fields.get("source").cloned().unwrap_or_default(),
            line: fields.get("line").cloned().unwrap_or_default(),
            source_id: fields.get("source_id").and_then(|s| s.parse().ok()),
        }
    }
}

/// Structured fields extracted from a log line by an OS parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub component: String,
    pub pid: Option<String>,
    pub content: String,
    pub level: Option<String>,
    pub month: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub address: Option<String>,
}

impl ParsedLog {
    /// Fallback when no OS regex matched: the raw line becomes the content
    pub fn unknown(line: &str) -> Self {
        Self {
            component: "unknown".to_string(),
            content: line.to_string(),
            ..Default::default()
        }
    }

    /// Flatten the non-empty fields into vector-store metadata
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("component".to_string(), Value::String(self.component.clone()));
        map.insert("content".to_string(), Value::String(self.content.clone()));
        let optional = [
            ("pid", &self.pid),
            ("level", &self.level),
            ("month", &self.month),
            ("date", &self.date),
            ("time", &self.time),
            ("host", &self.host),
            ("user", &self.user),
            ("address", &self.address),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                if !v.is_empty() {
                    map.insert(key.to_string(), Value::String(v.clone()));
                }
            }
        }
        map
    }
}

/// One log entry carried inside an issue candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateLog {
    /// Originating stream id, when known
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub templated: String,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub time: f64,
}

/// Entry on the `issues_candidates` stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueCandidate {
    pub os: String,
    #[serde(default)]
    pub issue_key: String,
    #[serde(default)]
    pub templated_summary: String,
    #[serde(default)]
    pub logs: Vec<CandidateLog>,
}

impl IssueCandidate {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("os".to_string(), self.os.clone()),
            ("issue_key".to_string(), self.issue_key.clone()),
            (
                "templated_summary".to_string(),
                self.templated_summary.clone(),
            ),
            (
                "logs".to_string(),
                serde_json::to_string(&self.logs).unwrap_or_else(|_| "[]".to_string()),
            ),
        ]
    }

    /// Decode from stream fields; malformed `logs` JSON degrades to empty
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let logs = fields
            .get("logs")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Self {
            os: fields.get("os").cloned().unwrap_or_default(),
            issue_key: fields.get("issue_key").cloned().unwrap_or_default(),
            templated_summary: fields
                .get("templated_summary")
                .cloned()
                .unwrap_or_default(),
            logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_field_roundtrip() {
        let record = LogRecord::new("snmp:10.0.0.1", "{\"oid\":\"1.3\"}").with_source_id(7);
        let fields: HashMap<String, String> = record.to_fields().into_iter().collect();
        let decoded = LogRecord::from_fields(&fields);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_parsed_log_unknown_fallback() {
        let parsed = ParsedLog::unknown("garbled ???");
        assert_eq!(parsed.component, "unknown");
        assert_eq!(parsed.content, "garbled ???");
        assert!(parsed.pid.is_none());
    }

    #[test]
    fn test_issue_candidate_roundtrip() {
        let candidate = IssueCandidate {
            os: "linux".to_string(),
            issue_key: "linux|sshd|1234".to_string(),
            templated_summary: "sshd[<*>]: Failed password".to_string(),
            logs: vec![CandidateLog {
                id: "1-0".to_string(),
                templated: "sshd[<*>]: Failed password".to_string(),
                raw: "sshd[1234]: Failed password".to_string(),
                component: "sshd".to_string(),
                pid: "1234".to_string(),
                time: 1.0,
            }],
        };
        let fields: HashMap<String, String> = candidate.to_fields().into_iter().collect();
        let decoded = IssueCandidate::from_fields(&fields);
        assert_eq!(decoded.issue_key, candidate.issue_key);
        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.logs[0].pid, "1234");
    }

    #[test]
    fn test_issue_candidate_bad_logs_json() {
        let mut fields = HashMap::new();
        fields.insert("os".to_string(), "linux".to_string());
        fields.insert("logs".to_string(), "not json".to_string());
        let decoded = IssueCandidate::from_fields(&fields);
        assert!(decoded.logs.is_empty());
    }
}
