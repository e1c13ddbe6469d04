//! ThousandEyes payload normalization (`{"type": "alert"|"test", ...}`)

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let typ = get_str(payload, "type");
    let mut out = Vec::new();

    if typ == "alert" {
        let severity = {
            let s = get_str(payload, "severity");
            if s.is_empty() {
                get_str(payload, "level")
            } else {
                s
            }
        }
        .to_lowercase();
        let value = match severity.as_str() {
            "minor" | "warning" => 1.0,
            "major" => 2.0,
            "critical" => 3.0,
            _ => 0.0,
        };
        out.push(
            MetricPoint::gauge("thousandeyes.alert.severity", value, "", "thousandeyes")
                .with_attribute("testId", Value::String(get_str(payload, "testId")))
                .with_attribute("rule", Value::String(get_str(payload, "ruleName"))),
        );
        return out;
    }

    if typ == "test" {
        if let Some(latency) = payload.get("avgLatency").and_then(as_number) {
            out.push(
                MetricPoint::gauge("thousandeyes.test.latency_ms", latency, "", "thousandeyes")
                    .with_unit("ms")
                    .with_attribute("testId", Value::String(get_str(payload, "testId"))),
            );
        }
        if let Some(loss) = payload.get("loss").and_then(as_number) {
            out.push(
                MetricPoint::gauge("thousandeyes.test.loss_pct", loss, "", "thousandeyes")
                    .with_unit("%")
                    .with_attribute("testId", Value::String(get_str(payload, "testId"))),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_severity_scale() {
        let points = normalize(
            &json!({"type": "alert", "severity": "major", "testId": 42, "ruleName": "High loss"}),
            &json!({}),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 2.0);
    }

    #[test]
    fn test_test_metrics() {
        let points = normalize(
            &json!({"type": "test", "avgLatency": 180.5, "loss": 2.3, "testId": 1}),
            &json!({}),
        );
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "thousandeyes.test.latency_ms");
        assert_eq!(points[1].name, "thousandeyes.test.loss_pct");
    }
}
