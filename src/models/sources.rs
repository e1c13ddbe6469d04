//! Data-source definitions
//!
//! Source rows are managed externally (REST CRUD over SQL); the pipeline only
//! reads the enabled set to drive producers and to enrich normalizers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataSource {
    pub id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub source_type: String,
    pub config: Value,
    pub enabled: bool,
}

impl DataSource {
    pub fn new(id: i64, source_type: &str, config: Value) -> Self {
        Self {
            id,
            source_type: source_type.to_string(),
            config,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_json_shape() {
        let source = DataSource::new(3, "snmp", json!({"hosts": []}));
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["type"], "snmp");
        assert_eq!(value["id"], 3);
    }
}
