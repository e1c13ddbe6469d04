//! Cross-source correlation
//!
//! Two bases: single-pass clustering over per-source-capped log samples, or
//! HDBSCAN over the prototype stores of every OS (Euclidean on L2-normalized
//! vectors, noise ignored). When the prototype basis is empty the HDBSCAN
//! request falls back to the logs basis so callers always get clusters when
//! any data exists. Results project onto a source/cluster graph.

use std::collections::HashMap;

use anyhow::Result;
use hdbscan::{Hdbscan, HdbscanHyperParams};
use ndarray::Array2;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::analytics::clustering::single_pass_cluster;
use crate::analytics::vectors::{medoid_index, normalize};
use crate::common::config::Settings;
use crate::common::os::SUPPORTED_OSES;
use crate::infra::vector_store::VectorStore;
use crate::models::correlation::{
    CorrelationGraph, CorrelationParams, CorrelationResult, GlobalCluster, GraphEdge, GraphNode,
    SampleLog,
};

/// Caller-selected mode and bounds
#[derive(Debug, Clone)]
pub struct CorrelationOptions {
    pub algorithm: String,
    pub basis: String,
    pub limit_per_source: usize,
    pub threshold: Option<f32>,
    pub min_size: Option<usize>,
    pub include_logs_per_cluster: usize,
    pub min_cluster_size: usize,
    pub min_samples: Option<usize>,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            algorithm: "hdbscan".to_string(),
            basis: "prototypes".to_string(),
            limit_per_source: 200,
            threshold: None,
            min_size: None,
            include_logs_per_cluster: 20,
            min_cluster_size: 5,
            min_samples: None,
        }
    }
}

struct LoadedRows {
    ids: Vec<String>,
    docs: Vec<String>,
    embs: Vec<Vec<f32>>,
    metas: Vec<Map<String, Value>>,
}

/// Compute cross-source clusters with the requested basis/algorithm
pub async fn global_correlation(
    store: &VectorStore,
    settings: &Settings,
    options: &CorrelationOptions,
) -> Result<CorrelationResult> {
    if options.basis == "prototypes" && options.algorithm == "hdbscan" {
        compute_global_prototype_clusters_hdbscan(store, settings, options).await
    } else {
        compute_global_clusters(store, settings, options).await
    }
}

/// Graph projection of a correlation result
pub fn build_graph_from_clusters(result: &CorrelationResult) -> CorrelationGraph {
    let mut source_nodes: HashMap<String, GraphNode> = HashMap::new();
    let mut cluster_nodes = Vec::new();
    let mut edges = Vec::new();

    for cluster in &result.clusters {
        cluster_nodes.push(GraphNode {
            id: cluster.id.clone(),
            node_type: "cluster".to_string(),
            label: cluster.id.clone(),
            size: cluster.size,
        });
        for (source, count) in &cluster.source_breakdown {
            let node_id = format!("source::{source}");
            source_nodes.entry(node_id.clone()).or_insert_with(|| GraphNode {
                id: node_id.clone(),
                node_type: "source".to_string(),
                label: if source.is_empty() {
                    "unknown".to_string()
                } else {
                    source.clone()
                },
                size: 1,
            });
            edges.push(GraphEdge {
                source: node_id,
                target: cluster.id.clone(),
                weight: *count,
            });
        }
    }

    let mut nodes: Vec<GraphNode> = source_nodes.into_values().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes.extend(cluster_nodes);
    CorrelationGraph {
        nodes,
        edges,
        params: result.params.clone(),
    }
}

/// Single-pass clustering over log samples from every OS collection,
/// capped per distinct source.
pub async fn compute_global_clusters(
    store: &VectorStore,
    settings: &Settings,
    options: &CorrelationOptions,
) -> Result<CorrelationResult> {
    let threshold = options
        .threshold
        .unwrap_or(settings.cluster_distance_threshold);
    let min_size = options.min_size.unwrap_or(settings.cluster_min_size);
    let params = CorrelationParams {
        algorithm: Some("single_pass".to_string()),
        basis: Some("logs".to_string()),
        threshold: Some(threshold),
        min_size: Some(min_size),
        limit_per_source: Some(options.limit_per_source),
        min_cluster_size: None,
        min_samples: None,
        include_logs_per_cluster: options.include_logs_per_cluster,
    };

    let mut rows = LoadedRows {
        ids: Vec::new(),
        docs: Vec::new(),
        embs: Vec::new(),
        metas: Vec::new(),
    };

    for os_name in SUPPORTED_OSES {
        let loaded = match load_collection(store, &settings.logs_collection(os_name), Some(2000)).await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                info!("correlation: failed to read logs os={} err={:#}", os_name, e);
                continue;
            }
        };

        // group indices by source and enforce the per-source cap
        let mut by_source: HashMap<String, Vec<usize>> = HashMap::new();
        for i in 0..loaded.ids.len() {
            let source = loaded
                .metas
                .get(i)
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            by_source.entry(source).or_default().push(i);
        }
        for indices in by_source.values() {
            for &i in indices.iter().take(options.limit_per_source) {
                rows.ids.push(loaded.ids[i].clone());
                rows.docs.push(loaded.docs.get(i).cloned().unwrap_or_default());
                rows.embs.push(loaded.embs.get(i).cloned().unwrap_or_default());
                let mut meta = loaded.metas.get(i).cloned().unwrap_or_default();
                meta.entry("os".to_string())
                    .or_insert_with(|| Value::String(os_name.to_string()));
                rows.metas.push(meta);
            }
        }
    }

    if rows.embs.is_empty() {
        return Ok(CorrelationResult {
            params,
            clusters: Vec::new(),
        });
    }

    let (clusters, centroids) = single_pass_cluster(&rows.embs, threshold, min_size);
    let normalized: Vec<Vec<f32>> = rows.embs.iter().map(|e| normalize(e)).collect();

    let mut out_clusters = Vec::new();
    for (ci, (members, centroid)) in clusters.iter().zip(centroids.iter()).enumerate() {
        let medoid = medoid_index(members, &normalized, centroid);

        let mut source_breakdown: HashMap<String, usize> = HashMap::new();
        let mut os_breakdown: HashMap<String, usize> = HashMap::new();
        for &gi in members {
            let meta = rows.metas.get(gi);
            let source = meta
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let os = meta
                .and_then(|m| m.get("os"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            *source_breakdown.entry(source).or_insert(0) += 1;
            *os_breakdown.entry(os).or_insert(0) += 1;
        }

        let sample_logs = members
            .iter()
            .take(options.include_logs_per_cluster)
            .map(|&gi| sample_from_row(&rows, gi))
            .collect();

        out_clusters.push(GlobalCluster {
            id: format!("gcluster_{ci}"),
            size: members.len(),
            centroid: centroid.clone(),
            medoid_document: rows.docs.get(medoid).cloned().unwrap_or_default(),
            source_breakdown,
            os_breakdown,
            sample_logs,
        });
    }

    Ok(CorrelationResult {
        params,
        clusters: out_clusters,
    })
}

/// HDBSCAN over the prototype stores of every OS. Falls back to the
/// single-pass logs basis when no prototypes exist.
pub async fn compute_global_prototype_clusters_hdbscan(
    store: &VectorStore,
    settings: &Settings,
    options: &CorrelationOptions,
) -> Result<CorrelationResult> {
    let min_cluster_size = options.min_cluster_size.max(2);
    let min_samples = options.min_samples.unwrap_or(options.min_cluster_size).max(1);
    let params = CorrelationParams {
        algorithm: Some("hdbscan".to_string()),
        basis: Some("prototypes".to_string()),
        threshold: None,
        min_size: None,
        limit_per_source: None,
        min_cluster_size: Some(min_cluster_size),
        min_samples: Some(min_samples),
        include_logs_per_cluster: options.include_logs_per_cluster,
    };

    let mut rows = LoadedRows {
        ids: Vec::new(),
        docs: Vec::new(),
        embs: Vec::new(),
        metas: Vec::new(),
    };
    for os_name in SUPPORTED_OSES {
        let loaded = match load_collection(store, &settings.proto_collection(os_name), None).await {
            Ok(loaded) => loaded,
            Err(e) => {
                info!(
                    "hdbscan correlation: failed to read prototypes os={} err={:#}",
                    os_name, e
                );
                continue;
            }
        };
        for i in 0..loaded.ids.len() {
            rows.ids.push(loaded.ids[i].clone());
            rows.docs.push(loaded.docs.get(i).cloned().unwrap_or_default());
            rows.embs.push(loaded.embs.get(i).cloned().unwrap_or_default());
            let mut meta = loaded.metas.get(i).cloned().unwrap_or_default();
            meta.entry("os".to_string())
                .or_insert_with(|| Value::String(os_name.to_string()));
            rows.metas.push(meta);
        }
    }

    if rows.embs.is_empty() {
        // nothing to correlate on the prototype basis yet
        info!("hdbscan correlation: no prototypes; falling back to logs basis");
        return compute_global_clusters(store, settings, options).await;
    }

    // L2-normalize so Euclidean distances agree with angular distances
    let dim = rows.embs.iter().map(Vec::len).max().unwrap_or(0);
    let mut matrix = Array2::<f64>::zeros((rows.embs.len(), dim));
    for (i, emb) in rows.embs.iter().enumerate() {
        let normalized = normalize(emb);
        for (j, v) in normalized.iter().enumerate() {
            matrix[[i, j]] = *v as f64;
        }
    }
    let data: Vec<Vec<f64>> = matrix.outer_iter().map(|row| row.to_vec()).collect();

    // density clustering is CPU-bound; keep it off the I/O scheduler
    let labels: Vec<i32> = match tokio::task::spawn_blocking(move || {
        let hyper_params = HdbscanHyperParams::builder()
            .min_cluster_size(min_cluster_size)
            .min_samples(min_samples)
            .build();
        let clusterer = Hdbscan::new(&data, hyper_params);
        clusterer.cluster()
    })
    .await?
    {
        Ok(labels) => labels,
        Err(e) => {
            warn!("hdbscan failed: {e:?}; returning no clusters");
            return Ok(CorrelationResult {
                params,
                clusters: Vec::new(),
            });
        }
    };

    let grouped = group_labels(&labels);
    let normalized: Vec<Vec<f32>> = rows.embs.iter().map(|e| normalize(e)).collect();

    let mut out_clusters = Vec::new();
    for (label, members) in grouped {
        let member_vecs: Vec<&[f32]> = members.iter().map(|&i| normalized[i].as_slice()).collect();
        let centroid = crate::analytics::vectors::mean(&member_vecs);
        let medoid = medoid_index(&members, &normalized, &centroid);

        let (source_breakdown, os_breakdown, sample_logs) = sample_prototype_logs(
            store,
            settings,
            &rows,
            &members,
            options.include_logs_per_cluster,
        )
        .await;

        out_clusters.push(GlobalCluster {
            id: format!("gcluster_{label}"),
            size: members.len(),
            centroid,
            medoid_document: rows.docs.get(medoid).cloned().unwrap_or_default(),
            source_breakdown,
            os_breakdown,
            sample_logs,
        });
    }
    out_clusters.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CorrelationResult {
        params,
        clusters: out_clusters,
    })
}

/// Group point indices by cluster label, ignoring the noise label (-1)
pub fn group_labels(labels: &[i32]) -> Vec<(i32, Vec<usize>)> {
    let mut grouped: HashMap<i32, Vec<usize>> = HashMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        if label < 0 {
            continue;
        }
        grouped.entry(label).or_default().push(idx);
    }
    let mut out: Vec<(i32, Vec<usize>)> = grouped.into_iter().collect();
    out.sort_by_key(|(label, _)| *label);
    out
}

async fn load_collection(
    store: &VectorStore,
    base_name: &str,
    limit: Option<usize>,
) -> Result<LoadedRows> {
    let collection = store.collection(base_name).await?;
    let data = collection
        .get(None, None, limit, &["embeddings", "documents", "metadatas"])
        .await?;
    Ok(LoadedRows {
        ids: data.ids,
        docs: data.documents,
        embs: data.embeddings,
        metas: data.metadatas,
    })
}

fn sample_from_row(rows: &LoadedRows, index: usize) -> SampleLog {
    let meta = rows.metas.get(index);
    SampleLog {
        id: rows.ids.get(index).cloned().unwrap_or_default(),
        document: rows.docs.get(index).cloned().unwrap_or_default(),
        os: meta
            .and_then(|m| m.get("os"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        source: meta
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        raw: meta
            .and_then(|m| m.get("raw"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    }
}

/// Fill source/os counts by sampling logs whose `cluster_id` equals each
/// member prototype's id, round-robin across members up to the cap.
async fn sample_prototype_logs(
    store: &VectorStore,
    settings: &Settings,
    rows: &LoadedRows,
    members: &[usize],
    include_logs_per_cluster: usize,
) -> (
    HashMap<String, usize>,
    HashMap<String, usize>,
    Vec<SampleLog>,
) {
    let mut source_breakdown: HashMap<String, usize> = HashMap::new();
    let mut os_breakdown: HashMap<String, usize> = HashMap::new();
    let mut samples = Vec::new();
    let per_proto_cap = (include_logs_per_cluster / members.len().max(1)).max(1);

    for &gi in members {
        if samples.len() >= include_logs_per_cluster {
            break;
        }
        let meta = rows.metas.get(gi);
        let proto_os = meta
            .and_then(|m| m.get("os"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let Some(proto_id) = rows.ids.get(gi).filter(|id| !id.is_empty()) else {
            continue;
        };
        let logs = match store.collection(&settings.logs_collection(&proto_os)).await {
            Ok(collection) => collection
                .get(
                    None,
                    Some(json!({"cluster_id": proto_id})),
                    Some(per_proto_cap),
                    &["documents", "metadatas"],
                )
                .await
                .unwrap_or_default(),
            Err(e) => {
                info!(
                    "hdbscan correlation: logs query failed os={} proto={} err={:#}",
                    proto_os, proto_id, e
                );
                continue;
            }
        };
        for j in 0..logs.ids.len() {
            if samples.len() >= include_logs_per_cluster {
                break;
            }
            let meta = logs.metadatas.get(j);
            let source = meta
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let os = meta
                .and_then(|m| m.get("os"))
                .and_then(Value::as_str)
                .unwrap_or(&proto_os)
                .to_string();
            *source_breakdown.entry(source.clone()).or_insert(0) += 1;
            *os_breakdown.entry(os.clone()).or_insert(0) += 1;
            samples.push(SampleLog {
                id: logs.ids[j].clone(),
                document: logs.documents.get(j).cloned().unwrap_or_default(),
                os,
                source,
                raw: meta
                    .and_then(|m| m.get("raw"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }
    (source_breakdown, os_breakdown, samples)
}
