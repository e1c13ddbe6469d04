//! Batch clustering and quality-metric invariants.

use log_sentinel::analytics::cluster_metrics::{cohesion, separation, silhouette_score};
use log_sentinel::analytics::clustering::{build_prototypes, single_pass_cluster};
use log_sentinel::analytics::cross_correlation::group_labels;
use log_sentinel::analytics::failure_rules::FailureRules;
use log_sentinel::analytics::vectors::{cosine_distance, normalize};

fn noisy_cluster(center: (f32, f32, f32), count: usize, spread: f32) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| {
            let jitter = spread * (i as f32 / count as f32);
            vec![center.0 + jitter, center.1 + jitter / 2.0, center.2]
        })
        .collect()
}

#[test]
fn test_every_member_within_threshold_of_its_centroid() {
    let mut embeddings = noisy_cluster((1.0, 0.0, 0.0), 8, 0.05);
    embeddings.extend(noisy_cluster((0.0, 1.0, 0.0), 8, 0.05));
    embeddings.extend(noisy_cluster((0.0, 0.0, 1.0), 8, 0.05));

    let threshold = 0.2;
    let min_size = 2;
    let (clusters, centroids) = single_pass_cluster(&embeddings, threshold, min_size);

    assert!(!clusters.is_empty());
    for (members, centroid) in clusters.iter().zip(centroids.iter()) {
        assert!(members.len() >= min_size);
        for &member in members {
            let d = cosine_distance(&normalize(&embeddings[member]), centroid);
            assert!(
                d <= threshold,
                "member {member} at distance {d} exceeds threshold {threshold}"
            );
        }
    }
}

#[test]
fn test_three_well_separated_groups() {
    let mut embeddings = noisy_cluster((1.0, 0.0, 0.0), 5, 0.02);
    embeddings.extend(noisy_cluster((0.0, 1.0, 0.0), 5, 0.02));
    embeddings.extend(noisy_cluster((0.0, 0.0, 1.0), 5, 0.02));

    let (clusters, _) = single_pass_cluster(&embeddings, 0.2, 2);
    assert_eq!(clusters.len(), 3);
    assert!(clusters.iter().all(|c| c.len() == 5));
}

#[test]
fn test_prototype_labels_from_member_documents() {
    let rules = FailureRules::load("rules/rules.yml");
    let documents: Vec<String> = vec![
        "smartd[<*>]: bad sector count rising on sda".to_string(),
        "smartd[<*>]: sector reallocated on sda".to_string(),
        "smartd[<*>]: disk failure predicted".to_string(),
        "kernel: out of memory: killed process <*>".to_string(),
        "kernel: oom-killer invoked by <*>".to_string(),
        "kernel: page allocation failure order:<*>".to_string(),
    ];
    let ids: Vec<String> = (0..documents.len()).map(|i| format!("{i}-0")).collect();
    let embeddings = vec![
        vec![1.0, 0.0],
        vec![0.99, 0.02],
        vec![0.98, 0.03],
        vec![0.0, 1.0],
        vec![0.02, 0.99],
        vec![0.03, 0.98],
    ];

    let (clusters, centroids) = single_pass_cluster(&embeddings, 0.2, 2);
    assert_eq!(clusters.len(), 2);
    let prototypes = build_prototypes(&rules, &ids, &documents, &embeddings, &clusters, &centroids);
    assert_eq!(prototypes.len(), 2);

    let labels: Vec<&str> = prototypes.iter().map(|p| p.label.as_str()).collect();
    assert!(labels.contains(&"disk"));
    assert!(labels.contains(&"memory"));
    for proto in &prototypes {
        assert_eq!(proto.rationale, "keyword_rules");
        assert_eq!(proto.size, 3);
        assert!(documents.contains(&proto.medoid_document));
    }
}

#[test]
fn test_quality_metrics_agree_on_good_clusterings() {
    let mut embeddings = noisy_cluster((1.0, 0.0, 0.0), 6, 0.02);
    embeddings.extend(noisy_cluster((0.0, 1.0, 0.0), 6, 0.02));
    let (clusters, _) = single_pass_cluster(&embeddings, 0.2, 2);
    assert_eq!(clusters.len(), 2);

    let silhouette = silhouette_score(&clusters, &embeddings);
    let cohesion_value = cohesion(&clusters, &embeddings);
    let separation_value = separation(&clusters, &embeddings);

    assert!((-1.0..=1.0).contains(&silhouette));
    assert!(silhouette > 0.5, "tight separated clusters, got {silhouette}");
    assert!(cohesion_value < separation_value);
}

#[test]
fn test_hdbscan_label_grouping_drops_noise() {
    let labels = vec![-1, 0, 0, 1, -1, 1, 1];
    let grouped = group_labels(&labels);
    assert_eq!(grouped.len(), 2);
    let total: usize = grouped.iter().map(|(_, members)| members.len()).sum();
    assert_eq!(total, 5);
}
