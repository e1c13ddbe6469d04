//! SquaredUp payload normalization (`{"type": "health"|"alert"|"dependency", ...}`)

use serde_json::Value;

use super::get_str;
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let typ = get_str(payload, "type");
    match typ.as_str() {
        "health" => {
            let state = {
                let s = get_str(payload, "state");
                if s.is_empty() {
                    get_str(payload, "status")
                } else {
                    s
                }
            }
            .to_lowercase();
            let value = if matches!(state.as_str(), "ok" | "healthy" | "green") {
                1.0
            } else {
                0.0
            };
            vec![
                MetricPoint::gauge("squaredup.health.ok", value, "", "squaredup")
                    .with_attribute("state", Value::String(state))
                    .with_attribute("name", Value::String(get_str(payload, "name"))),
            ]
        }
        "alert" => {
            let severity = get_str(payload, "severity").to_lowercase();
            let value = match severity.as_str() {
                "warning" => 1.0,
                "critical" | "error" => 2.0,
                _ => 0.0,
            };
            vec![
                MetricPoint::gauge("squaredup.alert.severity", value, "", "squaredup")
                    .with_attribute("id", Value::String(get_str(payload, "id")))
                    .with_attribute("title", Value::String(get_str(payload, "title")))
                    .with_attribute("severity", Value::String(severity)),
            ]
        }
        "dependency" => {
            let mut point = MetricPoint::gauge("squaredup.dependency.edge.count", 1.0, "", "squaredup")
                .with_attribute("from", Value::String(get_str(payload, "from")))
                .with_attribute("to", Value::String(get_str(payload, "to")));
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
    fn test_health_states() {
        let healthy = normalize(&json!({"type": "health", "state": "Green"}), &json!({}));
        assert_eq!(healthy[0].value, 1.0);
        let degraded = normalize(&json!({"type": "health", "status": "degraded"}), &json!({}));
        assert_eq!(degraded[0].value, 0.0);
    }

    #[test]
    fn test_alert_severity() {
        let points = normalize(
            &json!({"type": "alert", "severity": "critical", "title": "t"}),
            &json!({}),
        );
        assert_eq!(points[0].value, 2.0);
    }
}
