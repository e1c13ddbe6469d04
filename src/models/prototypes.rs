//! Cluster prototypes
//!
//! A prototype is the persistent representative of a cluster: centroid
//! embedding, medoid text, label, and bookkeeping metadata.

use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct Prototype {
    pub cluster_id: String,
    pub centroid: Vec<f32>,
    pub label: String,
    pub rationale: String,
    pub size: usize,
    pub medoid_document: String,
    pub exemplar_ids: Vec<String>,
}

impl Prototype {
    /// Vector-store metadata for this prototype
    pub fn to_metadata(&self, os_name: &str, created_by: &str, embedding_mode: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("os".to_string(), Value::String(os_name.to_string()));
        map.insert("label".to_string(), Value::String(self.label.clone()));
        map.insert(
            "rationale".to_string(),
            Value::String(self.rationale.clone()),
        );
        map.insert("size".to_string(), Value::from(self.size as u64));
        map.insert(
            "exemplars".to_string(),
            Value::String(self.exemplar_ids.join(",")),
        );
        map.insert(
            "created_by".to_string(),
            Value::String(created_by.to_string()),
        );
        map.insert(
            "embedding_mode".to_string(),
            Value::String(embedding_mode.to_string()),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_shape() {
        let proto = Prototype {
            cluster_id: "cluster_0".to_string(),
            centroid: vec![1.0, 0.0],
            label: "disk".to_string(),
            rationale: "keyword_rules".to_string(),
            size: 5,
            medoid_document: "smartd[<*>]: device error".to_string(),
            exemplar_ids: vec!["1-0".to_string(), "2-0".to_string()],
        };
        let meta = proto.to_metadata("linux", "batch", "templated");
        assert_eq!(meta["label"], "disk");
        assert_eq!(meta["created_by"], "batch");
        assert_eq!(meta["size"], 5);
    }
}
