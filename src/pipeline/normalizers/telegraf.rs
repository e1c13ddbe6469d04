//! Telegraf push payload normalization

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let name = get_str(payload, "name").to_lowercase();
    let empty = Value::Object(Default::default());
    let tags = payload.get("tags").unwrap_or(&empty);
    let fields = payload.get("fields").unwrap_or(&empty);
    let host = get_str(tags, "host");
    let device = get_str(tags, "device");
    let path = get_str(tags, "path");
    let time_nano = payload
        .get("timestamp")
        .and_then(as_number)
        .map(|ts| (ts * 1e9) as u64);

    let gauge = |metric: &str, value: &Value| -> Option<MetricPoint> {
        let num = as_number(value)?;
        let mut point = MetricPoint::gauge(metric, num, &host, "telegraf");
        if let Some(t) = time_nano {
            point = point.with_time(t);
        }
        Some(point)
    };

    let mut out = Vec::new();
    match name.as_str() {
        "cpu_temperature" => {
            if let Some(value) = fields.get("value") {
                if let Some(point) = gauge("system.cpu.temperature", value) {
                    out.push(point.with_unit("C"));
                }
            }
        }
        "smart_device" => {
            if let Some(value) = fields.get("health_ok") {
                if let Some(point) = gauge("smart.health_ok", value) {
                    out.push(point.with_attribute("device", Value::String(device.clone())));
                }
            }
            if let Some(value) = fields.get("power_on_hours") {
                if let Some(point) = gauge("smart.power_on_hours", value) {
                    out.push(
                        point
                            .with_unit("h")
                            .with_attribute("device", Value::String(device.clone())),
                    );
                }
            }
        }
        "disk" => {
            if let Some(value) = fields.get("used_percent") {
                if let Some(point) = gauge("fs.used_percent", value) {
                    out.push(
                        point
                            .with_unit("%")
                            .with_attribute("path", Value::String(path)),
                    );
                }
            }
        }
        _ => {
            // generic single-value mapping
            if let Some(value) = fields.get("value") {
                if let Some(point) = gauge(&format!("telegraf.{name}"), value) {
                    out.push(point);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cpu_temperature() {
        let payload = json!({
            "name": "cpu_temperature",
            "tags": {"host": "mac-1"},
            "fields": {"value": 74.5},
            "timestamp": 1700000000,
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "system.cpu.temperature");
        assert_eq!(points[0].unit.as_deref(), Some("C"));
        assert_eq!(points[0].time_unix_nano, 1_700_000_000_000_000_000);
    }

    #[test]
    fn test_smart_device_health() {
        let payload = json!({
            "name": "smart_device",
            "tags": {"host": "h", "device": "disk0"},
            "fields": {"health_ok": true, "power_on_hours": 4120},
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "smart.health_ok");
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[1].name, "smart.power_on_hours");
    }

    #[test]
    fn test_generic_fallback() {
        let payload = json!({
            "name": "Load1",
            "tags": {"host": "h"},
            "fields": {"value": 0.42},
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "telegraf.load1");
    }
}
