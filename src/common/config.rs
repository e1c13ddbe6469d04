//! Configuration management
//!
//! All tunables are loaded from the environment (with `.env` support) through
//! the `config` crate. Every key has a default so the pipeline can come up
//! against local services with no configuration at all.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Redis connection string (stream broker, counters, TTL hashes)
    pub redis_url: String,

    /// PostgreSQL connection string holding the data-source table
    pub database_url: Option<String>,

    /// Vector store (Chroma-compatible) base URL
    pub vector_store_url: String,

    /// Per-OS collection name prefixes
    pub template_collection_prefix: String,
    pub log_collection_prefix: String,
    pub proto_collection_prefix: String,

    /// Embedding provider: "openai" or "ollama"
    pub embedding_provider: String,
    /// Embed raw lines instead of templated ones (semantic embedding mode)
    pub embedding_use_raw_logs: bool,

    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_embedding_model: String,
    pub openai_chat_model: String,

    pub ollama_base_url: String,
    pub ollama_embedding_model: String,
    pub ollama_chat_model: String,

    /// Chat provider: "openai" or "ollama"
    pub llm_provider: String,
    pub llm_cost_per_1k_tokens: f64,

    /// Cosine distance above which a log line becomes a per-line candidate
    pub nearest_proto_threshold: f32,
    /// Cosine distance within which an online assignment joins a prototype
    pub online_cluster_distance_threshold: f32,
    /// Cosine distance for batch single-pass clustering
    pub cluster_distance_threshold: f32,
    /// Batch clusters smaller than this are dropped
    pub cluster_min_size: usize,
    /// Running per-cluster count at which a cluster candidate is emitted
    pub cluster_min_logs_for_classification: i64,

    /// Seconds of inactivity after which an open issue is flushed
    pub issue_inactivity_sec: f64,
    /// Cap on logs serialized into an issue candidate
    pub issue_max_logs_for_llm: usize,

    /// Alert hash TTL (visibility window)
    pub alerts_ttl_sec: u64,

    pub metrics_aggregation_interval_sec: u64,
    pub cluster_quality_threshold: f64,
    pub drift_detection_window_sec: u64,

    pub enable_metrics_normalization: bool,
    pub enable_per_line_candidates: bool,
    pub enable_cluster_metrics: bool,
    pub enable_enricher: bool,
    pub enable_cluster_enricher: bool,
    pub enable_producers: bool,
    pub enable_automations: bool,
    pub automations_dry_run: bool,

    /// Stream and key names
    pub issues_candidates_stream: String,
    pub clusters_candidates_stream: String,
    pub alerts_stream: String,
    pub metrics_stream: String,
    pub alerts_persisted_set: String,
    pub alerts_feedback_correct_set: String,
    pub alerts_feedback_incorrect_set: String,

    /// Rule file locations
    pub automation_rules_path: String,
    pub failure_rules_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            database_url: None,
            vector_store_url: "http://localhost:8000".to_string(),
            template_collection_prefix: "templates_".to_string(),
            log_collection_prefix: "logs_".to_string(),
            proto_collection_prefix: "proto_".to_string(),
            embedding_provider: "openai".to_string(),
            embedding_use_raw_logs: false,
            openai_base_url: "https://api.openai.com".to_string(),
            openai_api_key: None,
            openai_embedding_model: "text-embedding-3-small".to_string(),
            openai_chat_model: "gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_embedding_model: "nomic-embed-text".to_string(),
            ollama_chat_model: "llama3.1".to_string(),
            llm_provider: "openai".to_string(),
            llm_cost_per_1k_tokens: 0.002,
            nearest_proto_threshold: 0.35,
            online_cluster_distance_threshold: 0.30,
            cluster_distance_threshold: 0.25,
            cluster_min_size: 3,
            cluster_min_logs_for_classification: 10,
            issue_inactivity_sec: 30.0,
            issue_max_logs_for_llm: 50,
            alerts_ttl_sec: 24 * 3600,
            metrics_aggregation_interval_sec: 300,
            cluster_quality_threshold: 0.25,
            drift_detection_window_sec: 4 * 3600,
            enable_metrics_normalization: true,
            enable_per_line_candidates: false,
            enable_cluster_metrics: true,
            enable_enricher: true,
            enable_cluster_enricher: true,
            enable_producers: true,
            enable_automations: false,
            automations_dry_run: true,
            issues_candidates_stream: "issues_candidates".to_string(),
            clusters_candidates_stream: "clusters_candidates".to_string(),
            alerts_stream: "alerts".to_string(),
            metrics_stream: "metrics".to_string(),
            alerts_persisted_set: "alerts:persisted".to_string(),
            alerts_feedback_correct_set: "alerts:feedback:correct".to_string(),
            alerts_feedback_incorrect_set: "alerts:feedback:incorrect".to_string(),
            automation_rules_path: "rules/automations.yml".to_string(),
            failure_rules_path: "rules/rules.yml".to_string(),
        }
    }
}

impl Settings {
    /// Base name of the templates collection for an OS
    pub fn templates_collection(&self, os_name: &str) -> String {
        format!(
            "{}{}",
            self.template_collection_prefix,
            crate::common::os::canonical_os(os_name)
        )
    }

    /// Base name of the logs collection for an OS
    pub fn logs_collection(&self, os_name: &str) -> String {
        format!(
            "{}{}",
            self.log_collection_prefix,
            crate::common::os::canonical_os(os_name)
        )
    }

    /// Base name of the prototype collection for an OS
    pub fn proto_collection(&self, os_name: &str) -> String {
        format!(
            "{}{}",
            self.proto_collection_prefix,
            crate::common::os::canonical_os(os_name)
        )
    }

    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("Failed to read environment configuration")?;

        cfg.try_deserialize()
            .context("Failed to deserialize settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.alerts_stream, "alerts");
        assert_eq!(settings.issues_candidates_stream, "issues_candidates");
        assert_eq!(settings.log_collection_prefix, "logs_");
        assert!(settings.cluster_min_size >= 1);
    }

    #[test]
    fn test_thresholds_are_distances() {
        let settings = Settings::default();
        assert!(settings.online_cluster_distance_threshold > 0.0);
        assert!(settings.online_cluster_distance_threshold < 2.0);
        assert!(settings.cluster_distance_threshold > 0.0);
    }
}
