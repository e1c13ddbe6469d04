//! Vendor metric normalization
//!
//! Each supported producer kind maps its JSON payload (plus the data-source
//! config) to zero or more metric points. Unknown kinds normalize to nothing.

pub mod bluecat;
pub mod catalyst;
pub mod dcim_http;
pub mod redfish;
pub mod scom;
pub mod snmp;
pub mod squaredup;
pub mod telegraf;
pub mod thousandeyes;

use serde_json::Value;

use crate::models::metrics::MetricPoint;

/// Producer kinds that carry normalizable metric payloads
pub const METRIC_KINDS: [&str; 9] = [
    "snmp",
    "dcim_http",
    "telegraf",
    "redfish",
    "scom",
    "squaredup",
    "catalyst",
    "thousandeyes",
    "bluecat",
];

pub fn is_metric_kind(kind: &str) -> bool {
    METRIC_KINDS.contains(&kind)
}

/// Normalize a payload for the given kind; unknown kinds yield nothing
pub fn normalize(kind: &str, payload: &Value, config: &Value) -> Vec<MetricPoint> {
    match kind {
        "snmp" => snmp::normalize(payload, config),
        "dcim_http" => dcim_http::normalize(payload, config),
        "telegraf" => telegraf::normalize(payload, config),
        "redfish" => redfish::normalize(payload, config),
        "scom" => scom::normalize(payload, config),
        "squaredup" => squaredup::normalize(payload, config),
        "catalyst" => catalyst::normalize(payload, config),
        "thousandeyes" => thousandeyes::normalize(payload, config),
        "bluecat" => bluecat::normalize(payload, config),
        _ => Vec::new(),
    }
}

/// String field lookup, empty when missing
pub(crate) fn get_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// Numeric coercion accepting both JSON numbers and numeric strings
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_kind_normalizes_to_nothing() {
        assert!(normalize("mystery", &json!({}), &json!({})).is_empty());
    }

    #[test]
    fn test_as_number_coercions() {
        assert_eq!(as_number(&json!(3.5)), Some(3.5));
        assert_eq!(as_number(&json!("123456")), Some(123456.0));
        assert_eq!(as_number(&json!(true)), Some(1.0));
        assert_eq!(as_number(&json!([1])), None);
        assert_eq!(as_number(&json!("abc")), None);
    }
}
