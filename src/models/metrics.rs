//! Normalized metric points
//!
//! Vendor payloads are normalized into flat metric points and appended to the
//! `metrics` stream; `resource` and `attributes` travel as JSON fields.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    /// "gauge" | "sum" | "histogram"
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    pub unit: Option<String>,
    pub time_unix_nano: u64,
    pub resource: Map<String, Value>,
    pub attributes: Map<String, Value>,
}

impl MetricPoint {
    /// Build a gauge point with the given resource host/vendor pair
    pub fn gauge(name: impl Into<String>, value: f64, host: &str, vendor: &str) -> Self {
        let mut resource = Map::new();
        resource.insert("host".to_string(), Value::String(host.to_string()));
        resource.insert("vendor".to_string(), Value::String(vendor.to_string()));
        Self {
            name: name.into(),
            metric_type: "gauge".to_string(),
            value,
            unit: None,
            time_unix_nano: now_nano(),
            resource,
            attributes: Map::new(),
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_time(mut self, time_unix_nano: u64) -> Self {
        self.time_unix_nano = time_unix_nano;
        self
    }

    /// Encode as flat stream fields for the `metrics` stream
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), self.name.clone()),
            ("type".to_string(), self.metric_type.clone()),
            ("value".to_string(), self.value.to_string()),
            ("unit".to_string(), self.unit.clone().unwrap_or_default()),
            (
                "resource".to_string(),
                serde_json::to_string(&self.resource).unwrap_or_else(|_| "{}".to_string()),
            ),
            (
                "attributes".to_string(),
                serde_json::to_string(&self.attributes).unwrap_or_else(|_| "{}".to_string()),
            ),
        ]
    }
}

pub fn now_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_fields() {
        let point = MetricPoint::gauge("system.uptime", 1234.56, "10.0.0.1", "snmp")
            .with_unit("s")
            .with_attribute("oid", Value::String("1.3.6.1.2.1.1.3.0".to_string()));
        let fields: std::collections::HashMap<_, _> = point.to_fields().into_iter().collect();
        assert_eq!(fields["name"], "system.uptime");
        assert_eq!(fields["value"], "1234.56");
        assert_eq!(fields["unit"], "s");
        assert!(fields["resource"].contains("10.0.0.1"));
        assert!(fields["attributes"].contains("oid"));
    }
}
