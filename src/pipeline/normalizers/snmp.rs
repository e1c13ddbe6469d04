//! SNMP OID-to-metric mapping
//!
//! The data-source config carries the mappings, e.g.
//! `{"mappings":[{"oid":"1.3.6.1.2.1.1.3.0","name":"system.uptime","unit":"s","scale":0.01}]}`.

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, config: &Value) -> Vec<MetricPoint> {
    let oid = get_str(payload, "oid");
    let host = get_str(payload, "host");
    let Some(value) = payload.get("value") else {
        return Vec::new();
    };

    let mappings = config
        .get("mappings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let Some(mapping) = mappings
        .iter()
        .find(|m| m.get("oid").and_then(Value::as_str) == Some(oid.as_str()))
    else {
        return Vec::new();
    };

    let Some(mut num) = as_number(value) else {
        return Vec::new();
    };
    if let Some(scale) = mapping.get("scale").and_then(as_number_ref) {
        num *= scale;
    }

    let name = mapping
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(&oid)
        .to_string();
    let mut point = MetricPoint::gauge(name, num, &host, "snmp")
        .with_attribute("oid", Value::String(oid.clone()));
    if let Some(unit) = mapping.get("unit").and_then(Value::as_str) {
        point = point.with_unit(unit);
    }
    if let Some(metric_type) = mapping.get("type").and_then(Value::as_str) {
        point.metric_type = metric_type.to_string();
    }
    vec![point]
}

fn as_number_ref(value: &Value) -> Option<f64> {
    as_number(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uptime_config() -> Value {
        json!({"mappings": [{"oid": "1.3.6.1.2.1.1.3.0", "name": "system.uptime", "unit": "s", "type": "gauge", "scale": 0.01}]})
    }

    #[test]
    fn test_mapped_oid_with_scale() {
        let payload = json!({"host": "10.0.0.1", "oid": "1.3.6.1.2.1.1.3.0", "value": 123456});
        let points = normalize(&payload, &uptime_config());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "system.uptime");
        assert!((points[0].value - 1234.56).abs() < 1e-9);
        assert_eq!(points[0].unit.as_deref(), Some("s"));
        assert_eq!(points[0].resource["host"], "10.0.0.1");
    }

    #[test]
    fn test_string_value_coerced() {
        let payload = json!({"host": "h", "oid": "1.3.6.1.2.1.1.3.0", "value": "123456"});
        let points = normalize(&payload, &uptime_config());
        assert_eq!(points.len(), 1);
        assert!((points[0].value - 1234.56).abs() < 1e-9);
    }

    #[test]
    fn test_unmapped_oid_dropped() {
        let payload = json!({"host": "h", "oid": "1.3.9.9.9", "value": 1});
        assert!(normalize(&payload, &uptime_config()).is_empty());
    }

    #[test]
    fn test_non_numeric_value_dropped() {
        let payload = json!({"host": "h", "oid": "1.3.6.1.2.1.1.3.0", "value": "n/a"});
        assert!(normalize(&payload, &uptime_config()).is_empty());
    }
}
