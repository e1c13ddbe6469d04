//! Vendor incident derivation
//!
//! Network and Windows-management payloads don't flow through templating, so
//! incident candidates are derived straight from the normalized telemetry and
//! published on the issues stream. When no vendor rule matches, a generic
//! summary candidate keeps the event visible downstream.

use serde_json::Value;

use crate::schemas::logs::{CandidateLog, IssueCandidate};

fn get_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

fn first_str(payload: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| get_str(payload, k))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn candidate(os: &str, templated: String, raw: &str) -> IssueCandidate {
    IssueCandidate {
        os: os.to_string(),
        issue_key: String::new(),
        templated_summary: templated.clone(),
        logs: vec![CandidateLog {
            templated,
            raw: raw.to_string(),
            ..Default::default()
        }],
    }
}

/// Vendor-specific incident rules over a JSON payload
pub fn derive_vendor_candidates(kind: &str, payload: &Value, raw_line: &str) -> Vec<IssueCandidate> {
    let mut out = Vec::new();
    let typ = get_str(payload, "type");

    match kind {
        "thousandeyes" => {
            if typ == "alert" {
                let severity = first_str(payload, &["severity", "level"]).to_lowercase();
                if matches!(severity.as_str(), "warning" | "major" | "critical") {
                    out.push(candidate(
                        "network",
                        format!("thousandeyes alert {severity} {}", get_str(payload, "ruleName")),
                        raw_line,
                    ));
                }
            } else if typ == "test" {
                let metrics = payload.get("metrics").cloned().unwrap_or(Value::Null);
                let latency = metrics
                    .get("latencyMs")
                    .or_else(|| payload.get("avgLatency"))
                    .and_then(Value::as_f64);
                let loss = metrics.get("loss").and_then(Value::as_f64);
                let slow = latency.map(|l| l > 150.0).unwrap_or(false);
                let lossy = loss.map(|l| l > 1.0).unwrap_or(false);
                if slow || lossy {
                    out.push(candidate(
                        "network",
                        format!(
                            "thousandeyes test latency={}ms loss={}%",
                            latency.map(|l| l.to_string()).unwrap_or_default(),
                            loss.map(|l| l.to_string()).unwrap_or_default(),
                        ),
                        raw_line,
                    ));
                }
            }
        }
        "catalyst" => {
            if typ == "event" {
                let severity = get_str(payload, "severity").to_lowercase();
                if matches!(severity.as_str(), "major" | "critical") {
                    out.push(candidate(
                        "network",
                        format!("catalyst event {severity} {}", get_str(payload, "name")),
                        raw_line,
                    ));
                }
            }
        }
        "scom" => {
            if typ == "alert" {
                let severity = first_str(payload, &["Severity", "severity"]).to_lowercase();
                let name = first_str(payload, &["Name", "name"]);
                let source = get_str(payload, "MonitoringObjectDisplayName");
                if matches!(severity.as_str(), "warning" | "error" | "critical") || !name.is_empty()
                {
                    out.push(candidate(
                        "windows",
                        format!("scom alert {severity} {name} source={source}")
                            .trim()
                            .to_string(),
                        raw_line,
                    ));
                }
            }
        }
        "squaredup" => {
            if typ == "alert" {
                let severity = get_str(payload, "severity").to_lowercase();
                let title = get_str(payload, "title");
                if matches!(severity.as_str(), "warning" | "error" | "critical") || !title.is_empty()
                {
                    out.push(candidate(
                        "windows",
                        format!("squaredup alert {severity} {title}").trim().to_string(),
                        raw_line,
                    ));
                }
            } else if typ == "health" {
                let state = first_str(payload, &["state", "status"]).to_lowercase();
                let name = get_str(payload, "name");
                if !state.is_empty() && !matches!(state.as_str(), "ok" | "healthy" | "green") {
                    out.push(candidate(
                        "windows",
                        format!("squaredup health {state} {name}").trim().to_string(),
                        raw_line,
                    ));
                }
            }
        }
        _ => {}
    }

    out
}

/// Fallback OS by kind when no vendor rule produced a candidate
pub fn fallback_os(kind: &str) -> &'static str {
    match kind {
        "scom" | "squaredup" => "windows",
        _ => "network",
    }
}

/// Generic incident candidate when no vendor rule matched: a concise summary
/// from the payload, falling back to the truncated raw line.
pub fn generic_candidate(kind: &str, payload: &Value, raw_line: &str) -> IssueCandidate {
    let mut summary = first_str(payload, &["summary", "name", "type"]);
    summary.truncate(200);
    if summary.is_empty() {
        summary = raw_line.chars().take(200).collect();
    }
    candidate(fallback_os(kind), summary, raw_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_thousandeyes_alert() {
        let payload = json!({"type": "alert", "severity": "critical", "ruleName": "High loss"});
        let candidates = derive_vendor_candidates("thousandeyes", &payload, "{}");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].os, "network");
        assert!(candidates[0].templated_summary.contains("critical"));
    }

    #[test]
    fn test_thousandeyes_slow_test() {
        let payload = json!({"type": "test", "metrics": {"latencyMs": 220.0, "loss": 0.2}});
        let candidates = derive_vendor_candidates("thousandeyes", &payload, "{}");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].templated_summary.contains("latency=220"));
    }

    #[test]
    fn test_thousandeyes_healthy_test() {
        let payload = json!({"type": "test", "metrics": {"latencyMs": 20.0, "loss": 0.0}});
        assert!(derive_vendor_candidates("thousandeyes", &payload, "{}").is_empty());
    }

    #[test]
    fn test_scom_alert_by_name_only() {
        let payload = json!({"type": "alert", "Name": "Service stopped"});
        let candidates = derive_vendor_candidates("scom", &payload, "{}");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].os, "windows");
    }

    #[test]
    fn test_squaredup_health_degraded() {
        let payload = json!({"type": "health", "state": "degraded", "name": "IIS"});
        let candidates = derive_vendor_candidates("squaredup", &payload, "{}");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].templated_summary.contains("degraded"));
    }

    #[test]
    fn test_squaredup_health_green_skipped() {
        let payload = json!({"type": "health", "state": "green", "name": "IIS"});
        assert!(derive_vendor_candidates("squaredup", &payload, "{}").is_empty());
    }

    #[test]
    fn test_generic_candidate_prefers_payload_summary() {
        let payload = json!({"name": "uplink flap"});
        let c = generic_candidate("snmp", &payload, "raw line");
        assert_eq!(c.os, "network");
        assert_eq!(c.templated_summary, "uplink flap");
    }

    #[test]
    fn test_generic_candidate_truncates_raw() {
        let long_line = "x".repeat(500);
        let c = generic_candidate("scom", &json!({}), &long_line);
        assert_eq!(c.os, "windows");
        assert_eq!(c.templated_summary.len(), 200);
    }
}
