//! Batch single-pass clustering
//!
//! Periodic re-seeding of prototypes for an OS: one sequential pass assigns
//! each vector to the nearest centroid within a threshold or starts a new
//! cluster; centroids are renormalized means of the current members. Clusters
//! below the minimum size are dropped, the medoid becomes the prototype
//! document, and labels come from a majority vote of rule-based signals.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::analytics::cluster_metrics::ClusterMetricsTracker;
use crate::analytics::failure_rules::FailureRules;
use crate::analytics::vectors::{cosine_distance, mean, medoid_index, normalize};
use crate::common::config::Settings;
use crate::common::runtime::Shutdown;
use crate::infra::vector_store::VectorStore;
use crate::models::prototypes::Prototype;

/// Single-pass clustering over embeddings.
/// Returns (clusters as member-index lists, centroids), both filtered to
/// clusters of at least `min_size` members.
pub fn single_pass_cluster(
    embeddings: &[Vec<f32>],
    threshold: f32,
    min_size: usize,
) -> (Vec<Vec<usize>>, Vec<Vec<f32>>) {
    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| normalize(e)).collect();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut centroids: Vec<Vec<f32>> = Vec::new();

    for (idx, vec) in normalized.iter().enumerate() {
        if centroids.is_empty() {
            clusters.push(vec![idx]);
            centroids.push(vec.clone());
            continue;
        }
        let (best_i, best_dist) = centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_distance(vec, c)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, f32::MAX));
        if best_dist <= threshold {
            clusters[best_i].push(idx);
            let members: Vec<&[f32]> = clusters[best_i]
                .iter()
                .map(|&i| normalized[i].as_slice())
                .collect();
            centroids[best_i] = normalize(&mean(&members));
        } else {
            clusters.push(vec![idx]);
            centroids.push(vec.clone());
        }
    }

    let min_size = min_size.max(1);
    let mut filtered = Vec::new();
    let mut filtered_centroids = Vec::new();
    for (members, centroid) in clusters.into_iter().zip(centroids.into_iter()) {
        if members.len() >= min_size {
            filtered.push(members);
            filtered_centroids.push(centroid);
        }
    }
    (filtered, filtered_centroids)
}

/// Majority vote of rule-based signals over member documents
pub fn label_cluster(rules: &FailureRules, documents: &[&str]) -> (String, String) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for doc in documents {
        let signal = rules.match_signals(doc);
        if signal.has_signal {
            *counts.entry(signal.label).or_insert(0) += 1;
        }
    }
    match counts.into_iter().max_by_key(|(_, c)| *c) {
        Some((label, _)) => (label, "keyword_rules".to_string()),
        None => ("unknown".to_string(), "no_signal".to_string()),
    }
}

/// Build prototypes from clustering output
pub fn build_prototypes(
    rules: &FailureRules,
    ids: &[String],
    documents: &[String],
    embeddings: &[Vec<f32>],
    clusters: &[Vec<usize>],
    centroids: &[Vec<f32>],
) -> Vec<Prototype> {
    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| normalize(e)).collect();
    clusters
        .iter()
        .zip(centroids.iter())
        .enumerate()
        .map(|(ci, (members, centroid))| {
            let medoid = medoid_index(members, &normalized, centroid);
            let member_docs: Vec<&str> = members
                .iter()
                .map(|&i| documents[i].as_str())
                .collect();
            let (label, rationale) = label_cluster(rules, &member_docs);
            Prototype {
                cluster_id: format!("cluster_{ci}"),
                centroid: centroid.clone(),
                label,
                rationale,
                size: members.len(),
                medoid_document: documents[medoid].clone(),
                exemplar_ids: members.iter().take(5).map(|&i| ids[i].clone()).collect(),
            }
        })
        .collect()
}

/// Upsert prototypes into `proto_<os>`, keyed by cluster id with the centroid
/// as the stored embedding and the medoid text as the document.
pub async fn upsert_prototypes(
    store: &VectorStore,
    settings: &Settings,
    os_name: &str,
    prototypes: &[Prototype],
) -> Result<usize> {
    if prototypes.is_empty() {
        return Ok(0);
    }
    let collection = store
        .collection(&settings.proto_collection(os_name))
        .await?;
    let embedding_mode = if settings.embedding_use_raw_logs {
        "raw"
    } else {
        "templated"
    };
    let ids: Vec<String> = prototypes.iter().map(|p| p.cluster_id.clone()).collect();
    let docs: Vec<String> = prototypes
        .iter()
        .map(|p| p.medoid_document.clone())
        .collect();
    let embeddings: Vec<Vec<f32>> = prototypes.iter().map(|p| p.centroid.clone()).collect();
    let metadatas = prototypes
        .iter()
        .map(|p| p.to_metadata(os_name, "batch", embedding_mode))
        .collect();
    collection
        .upsert(&ids, &docs, Some(embeddings), metadatas)
        .await
        .with_context(|| format!("upsert prototypes failed os={os_name}"))?;
    Ok(prototypes.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterOsReport {
    pub os: String,
    pub clusters: usize,
    pub prototypes: usize,
}

/// Cluster templates (and an optional sample of logs) to re-seed prototypes
/// for an OS.
#[instrument(skip(store, rules, tracker, shutdown, settings))]
pub async fn cluster_os(
    store: &VectorStore,
    settings: &Settings,
    rules: &std::sync::Arc<FailureRules>,
    tracker: &ClusterMetricsTracker,
    shutdown: &Shutdown,
    os_name: &str,
    include_logs_samples: usize,
    threshold: Option<f32>,
    min_size: Option<usize>,
) -> Result<ClusterOsReport> {
    let threshold = threshold.unwrap_or(settings.cluster_distance_threshold);
    let min_size = min_size.unwrap_or(settings.cluster_min_size);

    let templates = store
        .collection(&settings.templates_collection(os_name))
        .await?;
    let data = templates
        .get(None, None, None, &["embeddings", "documents", "metadatas"])
        .await?;

    let mut ids = data.ids;
    let mut docs = data.documents;
    let mut embs = data.embeddings;

    if include_logs_samples > 0 {
        let logs = store.collection(&settings.logs_collection(os_name)).await?;
        let sample = logs
            .get(
                None,
                None,
                Some(include_logs_samples),
                &["embeddings", "documents", "metadatas"],
            )
            .await?;
        ids.extend(sample.ids);
        docs.extend(sample.documents);
        embs.extend(sample.embeddings);
    }

    if embs.is_empty() {
        return Ok(ClusterOsReport {
            os: os_name.to_string(),
            clusters: 0,
            prototypes: 0,
        });
    }

    // the clustering math is CPU-bound; keep it off the I/O scheduler
    let rules = rules.clone();
    let (clusters, prototypes, embs) = tokio::task::spawn_blocking(move || {
        let (clusters, centroids) = single_pass_cluster(&embs, threshold, min_size);
        let prototypes = build_prototypes(&rules, &ids, &docs, &embs, &clusters, &centroids);
        (clusters, prototypes, embs)
    })
    .await?;
    let count = upsert_prototypes(store, settings, os_name, &prototypes).await?;

    info!(
        "batch clustering complete os={} clusters={} prototypes={}",
        os_name,
        clusters.len(),
        count
    );

    if settings.enable_cluster_metrics && !clusters.is_empty() && !shutdown.is_set() {
        if let Err(e) = tracker
            .record_batch_clustering_metrics(os_name, &clusters, &embs, threshold, min_size)
            .await
        {
            tracing::warn!("failed to record batch metrics os={} err={:#}", os_name, e);
        }
    }

    Ok(ClusterOsReport {
        os: os_name.to_string(),
        clusters: clusters.len(),
        prototypes: count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::vectors::normalize;

    fn rules() -> FailureRules {
        FailureRules::load("rules/rules.yml")
    }

    #[test]
    fn test_single_pass_groups_similar_vectors() {
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.01, 0.0],
            vec![0.98, 0.02, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.99, 0.01],
            vec![0.01, 0.98, 0.0],
        ];
        let (clusters, centroids) = single_pass_cluster(&embeddings, 0.2, 2);
        assert_eq!(clusters.len(), 2);
        assert_eq!(centroids.len(), 2);
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[1].len(), 3);
    }

    #[test]
    fn test_small_clusters_dropped() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.01],
            vec![0.0, 1.0], // singleton
        ];
        let (clusters, _) = single_pass_cluster(&embeddings, 0.1, 2);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn test_members_within_threshold_of_centroid() {
        let embeddings: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let angle = (i % 4) as f32 * 0.01;
                vec![angle.cos(), angle.sin()]
            })
            .collect();
        let threshold = 0.15;
        let (clusters, centroids) = single_pass_cluster(&embeddings, threshold, 1);
        for (members, centroid) in clusters.iter().zip(centroids.iter()) {
            for &m in members {
                let d = cosine_distance(&normalize(&embeddings[m]), centroid);
                assert!(d <= threshold, "member {m} at distance {d}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let (clusters, centroids) = single_pass_cluster(&[], 0.2, 1);
        assert!(clusters.is_empty());
        assert!(centroids.is_empty());
    }

    #[test]
    fn test_label_cluster_majority_vote() {
        let rules = rules();
        let docs = vec![
            "smartd[<*>]: bad sector on sda",
            "smartd[<*>]: sector reallocated",
            "session opened for user root",
        ];
        let (label, rationale) = label_cluster(&rules, &docs);
        assert_eq!(label, "disk");
        assert_eq!(rationale, "keyword_rules");
    }

    #[test]
    fn test_label_cluster_no_signal() {
        let rules = rules();
        let (label, rationale) = label_cluster(&rules, &["hello world"]);
        assert_eq!(label, "unknown");
        assert_eq!(rationale, "no_signal");
    }

    #[test]
    fn test_build_prototypes_medoid_and_size() {
        let rules = rules();
        let ids: Vec<String> = (0..3).map(|i| format!("{i}-0")).collect();
        let docs = vec![
            "kernel panic at boot".to_string(),
            "kernel panic on shutdown".to_string(),
            "kernel panic again".to_string(),
        ];
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.01],
            vec![0.98, 0.02],
        ];
        let (clusters, centroids) = single_pass_cluster(&embeddings, 0.2, 2);
        let prototypes = build_prototypes(&rules, &ids, &docs, &embeddings, &clusters, &centroids);
        assert_eq!(prototypes.len(), 1);
        let proto = &prototypes[0];
        assert_eq!(proto.size, 3);
        assert_eq!(proto.label, "kernel");
        assert!(docs.contains(&proto.medoid_document));
        assert_eq!(proto.cluster_id, "cluster_0");
    }
}
