//! Data-source repository
//!
//! Source definitions are CRUD'd by an external REST surface into SQL; the
//! pipeline only needs the enabled set (for the producer manager) and single
//! rows by id (for normalizer config enrichment).

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::models::sources::DataSource;

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn enabled_sources(&self) -> Result<Vec<DataSource>>;
    async fn source_by_id(&self, id: i64) -> Result<Option<DataSource>>;
}

/// PostgreSQL-backed repository
pub struct PgSourceRepository {
    pool: PgPool,
}

impl PgSourceRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to source database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn enabled_sources(&self) -> Result<Vec<DataSource>> {
        let rows = sqlx::query_as::<_, DataSource>(
            r#"SELECT id, type, config, enabled FROM data_sources WHERE enabled = TRUE"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load enabled sources")?;
        Ok(rows)
    }

    async fn source_by_id(&self, id: i64) -> Result<Option<DataSource>> {
        let row = sqlx::query_as::<_, DataSource>(
            r#"SELECT id, type, config, enabled FROM data_sources WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load source by id")?;
        Ok(row)
    }
}

/// In-memory repository for tests and SQL-less deployments
#[derive(Default)]
pub struct MemorySourceRepository {
    sources: RwLock<Vec<DataSource>>,
}

impl MemorySourceRepository {
    pub fn new(sources: Vec<DataSource>) -> Self {
        Self {
            sources: RwLock::new(sources),
        }
    }

    pub fn replace(&self, sources: Vec<DataSource>) {
        *self.sources.write() = sources;
    }
}

#[async_trait]
impl SourceRepository for MemorySourceRepository {
    async fn enabled_sources(&self) -> Result<Vec<DataSource>> {
        Ok(self
            .sources
            .read()
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn source_by_id(&self, id: i64) -> Result<Option<DataSource>> {
        Ok(self.sources.read().iter().find(|s| s.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_repository_filters_disabled() {
        let mut disabled = DataSource::new(2, "snmp", json!({}));
        disabled.enabled = false;
        let repo = MemorySourceRepository::new(vec![
            DataSource::new(1, "filetail", json!({"paths": []})),
            disabled,
        ]);
        let enabled = repo.enabled_sources().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, 1);
        assert!(repo.source_by_id(2).await.unwrap().is_some());
        assert!(repo.source_by_id(9).await.unwrap().is_none());
    }
}
