//! SCOM payload normalization (`{"type": "alert"|"performance"|"event", ...}`)

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

fn first_str(payload: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| get_str(payload, k))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let typ = get_str(payload, "type");
    let host = get_str(payload, "ComputerName");

    match typ.as_str() {
        "performance" => {
            let object = first_str(payload, &["ObjectName", "object"]).to_lowercase();
            let counter = first_str(payload, &["CounterName", "counter"]).to_lowercase();
            let instance = first_str(payload, &["InstanceName", "instance"]);
            let Some(value) = payload
                .get("Value")
                .or_else(|| payload.get("value"))
                .and_then(as_number)
            else {
                return Vec::new();
            };
            let mut name_parts = vec!["scom".to_string(), "perf".to_string()];
            if !object.is_empty() {
                name_parts.push(object.replace(' ', "_"));
            }
            if !counter.is_empty() {
                name_parts.push(counter.replace(' ', "_"));
            }
            let mut point = MetricPoint::gauge(name_parts.join("."), value, &host, "scom");
            if !instance.is_empty() {
                point = point.with_attribute("instance", Value::String(instance));
            }
            vec![point]
        }
        "alert" => {
            let severity = first_str(payload, &["Severity", "severity"]).to_lowercase();
            let value = match severity.as_str() {
                "warning" => 1.0,
                "error" | "critical" => 2.0,
                _ => 0.0,
            };
            vec![
                MetricPoint::gauge("scom.alert.severity", value, &host, "scom")
                    .with_attribute(
                        "priority",
                        Value::String(first_str(payload, &["Priority", "priority"]).to_lowercase()),
                    )
                    .with_attribute("id", Value::String(first_str(payload, &["Id", "id"])))
                    .with_attribute("name", Value::String(first_str(payload, &["Name", "name"])))
                    .with_attribute(
                        "source",
                        Value::String(get_str(payload, "MonitoringObjectDisplayName")),
                    ),
            ]
        }
        "event" => {
            let level = first_str(payload, &["LevelDisplayName", "level"]).to_lowercase();
            let mut point = MetricPoint::gauge("scom.event.count", 1.0, &host, "scom")
                .with_attribute("level", Value::String(level));
            point.metric_type = "sum".to_string();
            vec![point]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_performance_counter() {
        let payload = json!({
            "type": "performance",
            "ComputerName": "win-1",
            "ObjectName": "Logical Disk",
            "CounterName": "Free Megabytes",
            "InstanceName": "C:",
            "Value": 1024,
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "scom.perf.logical_disk.free_megabytes");
        assert_eq!(points[0].attributes["instance"], "C:");
    }

    #[test]
    fn test_alert_severity_mapping() {
        let payload = json!({"type": "alert", "Severity": "Critical", "Name": "Disk failure"});
        let points = normalize(&payload, &json!({}));
        assert_eq!(points[0].value, 2.0);
        assert_eq!(points[0].attributes["name"], "Disk failure");
    }

    #[test]
    fn test_event_count() {
        let payload = json!({"type": "event", "LevelDisplayName": "Error"});
        let points = normalize(&payload, &json!({}));
        assert_eq!(points[0].metric_type, "sum");
        assert_eq!(points[0].value, 1.0);
    }
}
