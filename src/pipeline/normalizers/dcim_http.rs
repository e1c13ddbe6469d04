//! Generic DCIM HTTP payload normalization
//!
//! Producer payload shape: `{"url", "status", "body"}`. The data-source
//! config drives extraction:
//! `{"extract":[{"name","unit","type","path":["Thermal","Temperatures"],"field":"ReadingCelsius","attr_key":"Name"}]}`.
//! `{"schema":"redfish"}` applies a default Redfish thermal mapping.

use serde_json::Value;

use super::as_number;
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, config: &Value) -> Vec<MetricPoint> {
    let Some(body) = payload.get("body").filter(|b| b.is_object()) else {
        return Vec::new();
    };
    if config.get("schema").and_then(Value::as_str) == Some("redfish") {
        let default = serde_json::json!({
            "extract": [{
                "name": "redfish.temperature.celsius",
                "unit": "C",
                "path": ["Thermal", "Temperatures"],
                "field": "ReadingCelsius",
                "attr_key": "Name",
            }],
        });
        return run_extractors(body, &default);
    }
    run_extractors(body, config)
}

fn run_extractors(body: &Value, config: &Value) -> Vec<MetricPoint> {
    let mut out = Vec::new();
    for extractor in config
        .get("extract")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let mut node = Some(body);
        for key in extractor.get("path").and_then(Value::as_array).into_iter().flatten() {
            node = node
                .and_then(|n| key.as_str().and_then(|k| n.get(k)));
        }
        let Some(items) = node.and_then(Value::as_array) else {
            continue;
        };
        let Some(field) = extractor.get("field").and_then(Value::as_str).filter(|f| !f.is_empty())
        else {
            continue;
        };
        for item in items {
            let Some(value) = item.get(field).and_then(as_number) else {
                continue;
            };
            let name = extractor
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("dcim.metric");
            let mut point = MetricPoint::gauge(name, value, "", "dcim_http");
            if let Some(unit) = extractor.get("unit").and_then(Value::as_str) {
                point = point.with_unit(unit);
            }
            if let Some(metric_type) = extractor.get("type").and_then(Value::as_str) {
                point.metric_type = metric_type.to_string();
            }
            if let Some(attr_key) = extractor.get("attr_key").and_then(Value::as_str) {
                if let Some(attr) = item.get(attr_key) {
                    point = point.with_attribute(attr_key, attr.clone());
                }
            }
            out.push(point);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redfish_schema_default_mapping() {
        let payload = json!({
            "url": "https://dcim/api/sensors",
            "status": 200,
            "body": {"Thermal": {"Temperatures": [{"Name": "Inlet", "ReadingCelsius": 24.5}]}},
        });
        let points = normalize(&payload, &json!({"schema": "redfish"}));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "redfish.temperature.celsius");
        assert_eq!(points[0].attributes["Name"], "Inlet");
    }

    #[test]
    fn test_custom_extractor() {
        let payload = json!({
            "body": {"sensors": [{"id": "s1", "watts": "450"}]},
        });
        let config = json!({
            "extract": [{"name": "dcim.power.watts", "unit": "W", "path": ["sensors"], "field": "watts", "attr_key": "id"}],
        });
        let points = normalize(&payload, &config);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 450.0);
        assert_eq!(points[0].attributes["id"], "s1");
    }

    #[test]
    fn test_non_object_body() {
        assert!(normalize(&json!({"body": "text"}), &json!({})).is_empty());
    }
}
