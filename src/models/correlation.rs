//! Cross-source correlation results and graph projection models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Parameters echoed back with every correlation response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_per_source: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_cluster_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
    pub include_logs_per_cluster: usize,
}

/// A sampled log attached to a global cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleLog {
    pub id: String,
    pub document: String,
    pub os: String,
    pub source: String,
    pub raw: String,
}

/// One cross-source cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCluster {
    pub id: String,
    pub size: usize,
    pub centroid: Vec<f32>,
    pub medoid_document: String,
    pub source_breakdown: HashMap<String, usize>,
    pub os_breakdown: HashMap<String, usize>,
    pub sample_logs: Vec<SampleLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub params: CorrelationParams,
    pub clusters: Vec<GlobalCluster>,
}

/// Graph projection of a correlation result: one node per source, one per
/// cluster; edges weighted by member count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub params: CorrelationParams,
}
