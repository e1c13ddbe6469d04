//! Log Sentinel
//!
//! Streaming log-analysis pipeline: heterogeneous telemetry is ingested into a
//! shared Redis stream, parsed and templated, embedded and upserted into
//! per-OS vector collections, clustered online against evolving prototypes,
//! aggregated into per-component issues, and classified by an LLM into alerts
//! with a structured failure taxonomy.
//!
//! # Overview
//!
//! This crate provides:
//! - **Producers**: file tailers, SNMP/Redfish/HTTP pollers feeding the `logs` stream
//! - **Consumer**: parse + template + embed + upsert + candidacy per message
//! - **Issue aggregation**: inactivity-flushed issues keyed by (OS, component, PID)
//! - **Online clustering**: nearest-prototype-or-create with metrics recording
//! - **Enrichment**: HyDE retrieval + LLM classification into the `alerts` stream
//! - **Cluster metrics**: silhouette/cohesion/separation and drift detection
//! - **Cross-source correlation**: HDBSCAN over prototypes with graph projection
//! - **Automations**: rule-matched provider dispatch with cooldown

pub mod common {
    //! Configuration, shutdown signalling, and OS-name canonicalization

    pub mod config;
    pub mod os;
    pub mod runtime;
}

pub mod schemas {
    //! Wire-level payloads flowing through the broker streams

    pub mod alerts;
    pub mod logs;
}

pub mod models {
    //! Data models for metrics, prototypes, sources, and correlation results

    pub mod correlation;
    pub mod metrics;
    pub mod prototypes;
    pub mod sources;
}

pub mod parsers;

pub mod infra {
    //! External-service clients: broker, vector store, embeddings, LLM, SQL

    pub mod alerts;
    pub mod broker;
    pub mod embedding;
    pub mod llm;
    pub mod sources;
    pub mod vector_store;
}

pub mod analytics;
pub mod pipeline;

// Re-export commonly used types at the crate root
pub use common::config::Settings;
pub use common::runtime::Shutdown;
pub use infra::broker::Broker;
pub use infra::vector_store::VectorStore;
pub use pipeline::PipelineContext;
pub use schemas::alerts::{FailureType, FAILURE_TYPES};
pub use schemas::logs::{IssueCandidate, LogRecord, ParsedLog};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
