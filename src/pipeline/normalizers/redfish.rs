//! Redfish thermal/power payload normalization
//!
//! Producer payload shape: `{"host", "kind": "thermal"|"power", "body": {...}}`.

use serde_json::Value;

use super::{as_number, get_str};
use crate::models::metrics::MetricPoint;

pub fn normalize(payload: &Value, _config: &Value) -> Vec<MetricPoint> {
    let host = get_str(payload, "host");
    let kind = get_str(payload, "kind");
    let Some(body) = payload.get("body").filter(|b| b.is_object()) else {
        return Vec::new();
    };
    let mut out = Vec::new();

    if kind == "thermal" {
        for temp in body.get("Temperatures").and_then(Value::as_array).into_iter().flatten() {
            let Some(value) = temp.get("ReadingCelsius").and_then(as_number) else {
                continue;
            };
            out.push(
                MetricPoint::gauge("redfish.temperature.celsius", value, &host, "redfish")
                    .with_unit("C")
                    .with_attribute("name", temp.get("Name").cloned().unwrap_or(Value::Null))
                    .with_attribute(
                        "member_id",
                        temp.get("MemberId").cloned().unwrap_or(Value::Null),
                    ),
            );
        }
        for fan in body.get("Fans").and_then(Value::as_array).into_iter().flatten() {
            let Some(value) = fan.get("Reading").and_then(as_number) else {
                continue;
            };
            let unit = fan
                .get("ReadingUnits")
                .and_then(Value::as_str)
                .unwrap_or("RPM");
            out.push(
                MetricPoint::gauge("redfish.fan.speed", value, &host, "redfish")
                    .with_unit(unit)
                    .with_attribute("name", fan.get("Name").cloned().unwrap_or(Value::Null))
                    .with_attribute(
                        "member_id",
                        fan.get("MemberId").cloned().unwrap_or(Value::Null),
                    ),
            );
        }
    }

    if kind == "power" {
        for control in body
            .get("PowerControl")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(value) = control.get("PowerConsumedWatts").and_then(as_number) {
                out.push(
                    MetricPoint::gauge("redfish.power.consumed_watts", value, &host, "redfish")
                        .with_unit("W"),
                );
            }
        }
        for volt in body.get("Voltages").and_then(Value::as_array).into_iter().flatten() {
            let Some(value) = volt.get("ReadingVolts").and_then(as_number) else {
                continue;
            };
            out.push(
                MetricPoint::gauge("redfish.voltage.volts", value, &host, "redfish")
                    .with_unit("V")
                    .with_attribute("name", volt.get("Name").cloned().unwrap_or(Value::Null))
                    .with_attribute(
                        "member_id",
                        volt.get("MemberId").cloned().unwrap_or(Value::Null),
                    ),
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
    fn test_thermal_payload() {
        let payload = json!({
            "host": "https://bmc-1",
            "kind": "thermal",
            "body": {
                "Temperatures": [
                    {"Name": "CPU1 Temp", "MemberId": "0", "ReadingCelsius": 62},
                    {"Name": "Broken", "MemberId": "1"},
                ],
                "Fans": [{"Name": "Fan1", "MemberId": "0", "Reading": 4200, "ReadingUnits": "RPM"}],
            },
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "redfish.temperature.celsius");
        assert_eq!(points[0].value, 62.0);
        assert_eq!(points[1].name, "redfish.fan.speed");
    }

    #[test]
    fn test_power_payload() {
        let payload = json!({
            "host": "https://bmc-1",
            "kind": "power",
            "body": {
                "PowerControl": [{"PowerConsumedWatts": 312.0}],
                "Voltages": [{"Name": "VRM1", "ReadingVolts": 12.1}],
            },
        });
        let points = normalize(&payload, &json!({}));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "redfish.power.consumed_watts");
        assert_eq!(points[1].name, "redfish.voltage.volts");
    }

    #[test]
    fn test_missing_body() {
        assert!(normalize(&json!({"host": "h", "kind": "thermal"}), &json!({})).is_empty());
    }
}
