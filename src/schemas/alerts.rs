//! Alert payloads and the failure-type taxonomy

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure taxonomy used by the LLM classification schema.
/// Lowercase single tokens; keep aligned with the rule labels in rules/rules.yml.
pub const FAILURE_TYPES: [&str; 23] = [
    "disk",
    "storage",
    "raid",
    "nvme",
    "filesystem",
    "io",
    "cpu",
    "memory",
    "network",
    "power",
    "thermal",
    "wifi",
    "windows_update",
    "service_failure",
    "sandbox",
    "application",
    "configuration",
    "security",
    "dependency",
    "kernel",
    "driver",
    "os_update",
    "unknown",
];

/// Pipe-joined taxonomy for embedding into LLM prompts
pub fn taxonomy_spec() -> String {
    FAILURE_TYPES.join("|")
}

/// Parsed failure type; anything outside the taxonomy maps to `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Disk,
    Storage,
    Raid,
    Nvme,
    Filesystem,
    Io,
    Cpu,
    Memory,
    Network,
    Power,
    Thermal,
    Wifi,
    WindowsUpdate,
    ServiceFailure,
    Sandbox,
    Application,
    Configuration,
    Security,
    Dependency,
    Kernel,
    Driver,
    OsUpdate,
    Unknown,
}

impl FailureType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "disk" => Self::Disk,
            "storage" => Self::Storage,
            "raid" => Self::Raid,
            "nvme" => Self::Nvme,
            "filesystem" => Self::Filesystem,
            "io" => Self::Io,
            "cpu" => Self::Cpu,
            "memory" => Self::Memory,
            "network" => Self::Network,
            "power" => Self::Power,
            "thermal" => Self::Thermal,
            "wifi" => Self::Wifi,
            "windows_update" => Self::WindowsUpdate,
            "service_failure" => Self::ServiceFailure,
            "sandbox" => Self::Sandbox,
            "application" => Self::Application,
            "configuration" => Self::Configuration,
            "security" => Self::Security,
            "dependency" => Self::Dependency,
            "kernel" => Self::Kernel,
            "driver" => Self::Driver,
            "os_update" => Self::OsUpdate,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Storage => "storage",
            Self::Raid => "raid",
            Self::Nvme => "nvme",
            Self::Filesystem => "filesystem",
            Self::Io => "io",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Network => "network",
            Self::Power => "power",
            Self::Thermal => "thermal",
            Self::Wifi => "wifi",
            Self::WindowsUpdate => "windows_update",
            Self::ServiceFailure => "service_failure",
            Self::Sandbox => "sandbox",
            Self::Application => "application",
            Self::Configuration => "configuration",
            Self::Security => "security",
            Self::Dependency => "dependency",
            Self::Kernel => "kernel",
            Self::Driver => "driver",
            Self::OsUpdate => "os_update",
            Self::Unknown => "unknown",
        }
    }
}

/// Entry on the `clusters_candidates` stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCandidate {
    pub os: String,
    pub cluster_id: String,
}

impl ClusterCandidate {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("os".to_string(), self.os.clone()),
            ("cluster_id".to_string(), self.cluster_id.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            os: fields.get("os").cloned().unwrap_or_default(),
            cluster_id: fields.get("cluster_id").cloned().unwrap_or_default(),
        }
    }
}

/// Alert published to the `alerts` stream.
///
/// Top-level fields are normalized for stream consumers; `result` carries the
/// LLM JSON verbatim (or `{error, raw}` when the call failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub os: String,
    #[serde(default)]
    pub issue_key: String,
    #[serde(default)]
    pub cluster_id: String,
    pub is_hardware_failure: bool,
    pub failure_type: String,
    pub confidence: Option<f64>,
    pub result: Value,
    #[serde(default)]
    pub log_ids: Vec<String>,
}

impl Alert {
    /// Build an issue alert from a classification result
    pub fn for_issue(os: &str, issue_key: &str, result: Value, log_ids: Vec<String>) -> Self {
        Self {
            alert_type: "issue".to_string(),
            os: os.to_string(),
            issue_key: issue_key.to_string(),
            cluster_id: String::new(),
            is_hardware_failure: result
                .get("is_hardware_failure")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            failure_type: result
                .get("failure_type")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            confidence: result.get("confidence").and_then(Value::as_f64),
            result,
            log_ids,
        }
    }

    /// Build a cluster alert from a classification result
    pub fn for_cluster(os: &str, cluster_id: &str, result: Value) -> Self {
        Self {
            alert_type: "cluster".to_string(),
            os: os.to_string(),
            issue_key: String::new(),
            cluster_id: cluster_id.to_string(),
            is_hardware_failure: result
                .get("is_hardware_failure")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            failure_type: result
                .get("failure_type")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            confidence: result.get("confidence").and_then(Value::as_f64),
            result,
            log_ids: Vec::new(),
        }
    }

    /// Encode as flat stream fields (booleans lowercased, JSON stringified)
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("type".to_string(), self.alert_type.clone()),
            ("os".to_string(), self.os.clone()),
        ];
        if self.alert_type == "cluster" {
            fields.push(("cluster_id".to_string(), self.cluster_id.clone()));
        } else {
            fields.push(("issue_key".to_string(), self.issue_key.clone()));
        }
        fields.push((
            "is_hardware_failure".to_string(),
            self.is_hardware_failure.to_string(),
        ));
        fields.push(("failure_type".to_string(), self.failure_type.clone()));
        fields.push((
            "confidence".to_string(),
            self.confidence.map(|c| c.to_string()).unwrap_or_default(),
        ));
        fields.push((
            "result".to_string(),
            serde_json::to_string(&self.result).unwrap_or_else(|_| "{}".to_string()),
        ));
        fields.push((
            "log_ids".to_string(),
            serde_json::to_string(&self.log_ids).unwrap_or_else(|_| "[]".to_string()),
        ));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_taxonomy_spec_contains_all_types() {
        let spec = taxonomy_spec();
        assert!(spec.starts_with("disk|"));
        assert!(spec.ends_with("|unknown"));
        assert_eq!(spec.split('|').count(), FAILURE_TYPES.len());
    }

    #[test]
    fn test_failure_type_parse_unknown_fallback() {
        assert_eq!(FailureType::parse("thermal"), FailureType::Thermal);
        assert_eq!(FailureType::parse("THERMAL"), FailureType::Thermal);
        assert_eq!(FailureType::parse("made-up"), FailureType::Unknown);
        for name in FAILURE_TYPES {
            assert_eq!(FailureType::parse(name).as_str(), name);
        }
    }

    #[test]
    fn test_issue_alert_normalizes_top_level_fields() {
        let result = json!({
            "is_hardware_failure": true,
            "failure_type": "disk",
            "confidence": 0.83,
            "summary": "disk errors",
        });
        let alert = Alert::for_issue("linux", "linux|smartd|42", result, vec!["1-0".into()]);
        assert!(alert.is_hardware_failure);
        assert_eq!(alert.failure_type, "disk");
        assert_eq!(alert.confidence, Some(0.83));

        let fields: HashMap<String, String> = alert.to_fields().into_iter().collect();
        assert_eq!(fields["is_hardware_failure"], "true");
        assert_eq!(fields["issue_key"], "linux|smartd|42");
        assert!(fields["result"].contains("disk errors"));
    }

    #[test]
    fn test_error_result_degrades_gracefully() {
        let result = json!({"error": "LLM call failed", "raw": "timeout"});
        let alert = Alert::for_issue("linux", "k", result, vec![]);
        assert!(!alert.is_hardware_failure);
        assert_eq!(alert.failure_type, "");
        assert!(alert.confidence.is_none());
    }
}
