//! Property-based tests using proptest
//!
//! These verify properties that should hold for all inputs: templating
//! determinism, masking invariants, metric bounds, and codec roundtrips.

use std::collections::HashMap;

use log_sentinel::analytics::cluster_metrics::silhouette_score;
use log_sentinel::analytics::vectors::{cosine_distance, l2_norm, normalize};
use log_sentinel::parsers::templating::template_content;
use log_sentinel::pipeline::automations::parse_cooldown;
use log_sentinel::schemas::logs::LogRecord;
use proptest::prelude::*;

// ============================================================================
// TEMPLATING PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn test_templating_deterministic(message in ".{0,200}") {
        let a = template_content(&message);
        let b = template_content(&message);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_templating_idempotent_on_words(message in "[a-z ]{0,80}") {
        // alphabetic text has nothing to mask; a second pass is a no-op
        let once = template_content(&message);
        let twice = template_content(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_ipv4_always_masked(a in 1u8..=255, b in 0u8..=255, c in 0u8..=255, d in 1u8..=255) {
        let message = format!("connection from {a}.{b}.{c}.{d} refused");
        let templated = template_content(&message);
        let needle = format!("{}.{}.{}.{}", a, b, c, d);
        prop_assert!(!templated.contains(&needle));
        prop_assert!(templated.contains("<*>"));
    }

    #[test]
    fn test_standalone_numbers_masked(n in 0u64..1_000_000u64) {
        let templated = template_content(&format!("retry count {n} exceeded"));
        prop_assert_eq!(templated, "retry count <*> exceeded");
    }

    #[test]
    fn test_lines_differing_only_in_masked_tokens_collapse(
        port_a in 1u16..65535,
        port_b in 1u16..65535,
    ) {
        let a = template_content(&format!("Failed password from 10.0.0.1 port {port_a}"));
        let b = template_content(&format!("Failed password from 192.168.7.9 port {port_b}"));
        prop_assert_eq!(a, b);
    }
}

// ============================================================================
// VECTOR MATH PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn test_normalized_vectors_have_unit_norm(vec in prop::collection::vec(-10.0f32..10.0, 2..16)) {
        prop_assume!(vec.iter().any(|v| v.abs() > 1e-3));
        let normalized = normalize(&vec);
        let norm = l2_norm(&normalized);
        prop_assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_distance_bounds(
        a in prop::collection::vec(-1.0f32..1.0, 4),
        b in prop::collection::vec(-1.0f32..1.0, 4),
    ) {
        let d = cosine_distance(&normalize(&a), &normalize(&b));
        prop_assert!((0.0..=2.0).contains(&d));
    }

    #[test]
    fn test_silhouette_always_in_range(
        points in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 4..24),
    ) {
        // split points into two arbitrary clusters
        let mid = points.len() / 2;
        let clusters = vec![(0..mid).collect::<Vec<_>>(), (mid..points.len()).collect()];
        let score = silhouette_score(&clusters, &points);
        prop_assert!((-1.0..=1.0).contains(&score), "score {} out of range", score);
    }
}

// ============================================================================
// CODEC AND PARSING PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn test_log_record_roundtrip(
        source in "[a-z_]{1,12}(:[a-z0-9.]{1,20})?",
        line in ".{0,200}",
        source_id in prop::option::of(1i64..100_000),
    ) {
        let mut record = LogRecord::new(source, line);
        if let Some(id) = source_id {
            record = record.with_source_id(id);
        }
        let fields: HashMap<String, String> = record.to_fields().into_iter().collect();
        let decoded = LogRecord::from_fields(&fields);
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn test_cooldown_garbage_falls_back_to_default(raw in "[a-z]{0,10}") {
        // non-numeric input falls back to the 15-minute default
        prop_assert_eq!(parse_cooldown(&raw), 900);
    }

    #[test]
    fn test_cooldown_units(n in 1u64..1000) {
        prop_assert_eq!(parse_cooldown(&format!("{n}s")), n);
        prop_assert_eq!(parse_cooldown(&format!("{n}m")), n * 60);
        prop_assert_eq!(parse_cooldown(&format!("{n}h")), n * 3600);
    }
}
