//! Prototype router
//!
//! Nearest-prototype lookup with the guards the back-end demands: empty
//! collections yield no matches instead of index errors, non-finite distances
//! are treated as missing, and a missing-distance result triggers an explicit
//! re-embed + re-query fallback.

use anyhow::Result;
use tracing::debug;

use crate::common::config::Settings;
use crate::infra::vector_store::{Neighbor, VectorStore};

/// Return the top-k nearest prototypes from `proto_<os>` with distances
pub async fn nearest_prototype(
    store: &VectorStore,
    settings: &Settings,
    os_name: &str,
    text: &str,
    k: usize,
) -> Result<Vec<Neighbor>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let collection = store
        .collection(&settings.proto_collection(os_name))
        .await?;

    // Querying an empty HNSW index raises back-end errors even when metadata
    // rows already exist; skip the query outright when the count is zero.
    match collection.count().await {
        Ok(0) => {
            debug!("empty proto collection os={}; no matches", os_name);
            return Ok(Vec::new());
        }
        Ok(_) => {}
        Err(e) => debug!("proto count unavailable os={}: {e:#}", os_name),
    }

    let result = collection
        .query_texts(
            &[text.to_string()],
            k.max(1),
            None,
            &["distances", "metadatas", "documents"],
        )
        .await?;
    let neighbors = result.first_neighbors();

    // No valid distances at all: re-embed explicitly and re-query
    if !neighbors.is_empty() && neighbors.iter().all(|n| n.distance.is_none()) {
        let embedding = store.embedder().embed_one(text).await?;
        let retry = collection
            .query_embeddings(
                &[embedding],
                k.max(1),
                None,
                &["distances", "metadatas", "documents"],
            )
            .await?;
        let retried = retry.first_neighbors();
        if !retried.is_empty() {
            return Ok(retried);
        }
    }

    Ok(neighbors)
}

/// Pick the assignment for an online clustering decision:
/// `Some(id)` when the nearest prototype is within the threshold.
pub fn pick_assignment(neighbors: &[Neighbor], threshold: f32) -> Option<(String, f32)> {
    let nearest = neighbors.first()?;
    let distance = nearest.distance?;
    if distance <= threshold && !nearest.id.is_empty() {
        Some((nearest.id.clone(), distance))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn neighbor(id: &str, distance: Option<f32>) -> Neighbor {
        Neighbor {
            id: id.to_string(),
            document: String::new(),
            distance,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_pick_assignment_within_threshold() {
        let neighbors = vec![neighbor("cluster_ab", Some(0.2))];
        assert_eq!(
            pick_assignment(&neighbors, 0.3),
            Some(("cluster_ab".to_string(), 0.2))
        );
    }

    #[test]
    fn test_pick_assignment_above_threshold() {
        let neighbors = vec![neighbor("cluster_ab", Some(0.5))];
        assert_eq!(pick_assignment(&neighbors, 0.3), None);
    }

    #[test]
    fn test_pick_assignment_missing_distance() {
        let neighbors = vec![neighbor("cluster_ab", None)];
        assert_eq!(pick_assignment(&neighbors, 0.3), None);
    }

    #[test]
    fn test_pick_assignment_no_neighbors() {
        assert_eq!(pick_assignment(&[], 0.3), None);
    }
}
