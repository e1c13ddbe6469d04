//! BlueCat event payload normalization

use serde_json::Value;

use super::get_str;
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
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
        "warning" | "minor" => 1.0,
        "major" => 2.0,
        "critical" | "error" => 3.0,
        _ => 0.0,
    };
    vec![
        MetricPoint::gauge("bluecat.event.severity", value, "", "bluecat")
            .with_attribute("category", Value::String(get_str(payload, "category"))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_mapping() {
        let points = normalize(&json!({"severity": "critical", "category": "dns"}), &json!({}));
        assert_eq!(points[0].value, 3.0);
        assert_eq!(points[0].attributes["category"], "dns");
    }
}
