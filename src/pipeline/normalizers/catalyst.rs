//! Cisco Catalyst Center payload normalization

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let typ = get_str(payload, "type");

    if let Some(domain) = typ.strip_prefix("health_") {
        let score = payload
            .get("healthScore")
            .or_else(|| payload.get("score"))
            .or_else(|| payload.get("networkHealthAverage"))
            .and_then(as_number);
        let Some(value) = score else {
            return Vec::new();
        };
        return vec![
            MetricPoint::gauge(format!("cisco.cc.health.{domain}"), value, "", "cisco_catalyst")
                .with_unit("%"),
        ];
    }

    if typ == "event" {
        let severity = {
            let s = get_str(payload, "severity");
            if s.is_empty() {
                get_str(payload, "category")
            } else {
                s
            }
        }
        .to_lowercase();
        let mut point = MetricPoint::gauge("cisco.cc.event.count", 1.0, "", "cisco_catalyst")
            .with_attribute("severity", Value::String(severity))
            .with_attribute("name", Value::String(get_str(payload, "name")));
        point.metric_type = "sum".to_string();
        return vec![point];
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_score() {
        let points = normalize(&json!({"type": "health_network", "healthScore": 87}), &json!({}));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "cisco.cc.health.network");
        assert_eq!(points[0].value, 87.0);
    }

    #[test]
    fn test_event_count() {
        let points = normalize(
            &json!({"type": "event", "severity": "Major", "name": "Link down"}),
            &json!({}),
        );
        assert_eq!(points[0].metric_type, "sum");
        assert_eq!(points[0].attributes["severity"], "major");
    }

    #[test]
    fn test_health_without_score() {
        assert!(normalize(&json!({"type": "health_network"}), &json!({})).is_empty());
    }
}
