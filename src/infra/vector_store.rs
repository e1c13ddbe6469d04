//! Vector store client (Chroma-compatible HTTP API)
//!
//! Collections are namespaced per OS and suffixed with the embedding-provider
//! identity; the distance metric is cosine. Empty collections must yield "no
//! results", never an error surface; the nearest-neighbor guards here and in
//! the prototype router depend on that.

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::common::config::Settings;
use crate::infra::embedding::EmbeddingProvider;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]+").unwrap();
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vector store api error status={status}: {message}")]
    Api { status: u16, message: String },
}

impl StoreError {
    /// Back-ends raise index errors when querying an empty HNSW index even
    /// though metadata rows exist; callers treat this as "no neighbors yet".
    pub fn is_empty_index(&self) -> bool {
        match self {
            StoreError::Api { message, .. } => {
                let m = message.to_lowercase();
                m.contains("index out of range") || m.contains("number of elements is zero")
            }
            _ => false,
        }
    }
}

/// One nearest-neighbor hit; non-finite distances are reported as missing
#[derive(Debug, Clone, Default)]
pub struct Neighbor {
    pub id: String,
    pub document: String,
    pub distance: Option<f32>,
    pub metadata: Map<String, Value>,
}

/// Flat `get` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionGet {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub documents: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadatas: Vec<Map<String, Value>>,
}

/// Nested `query` response (one inner list per query vector)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionQuery {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ids: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub documents: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distances: Vec<Vec<f32>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadatas: Vec<Vec<Map<String, Value>>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl CollectionQuery {
    /// Flatten the hits for the first query vector into neighbors
    pub fn first_neighbors(&self) -> Vec<Neighbor> {
        let ids = self.ids.first().cloned().unwrap_or_default();
        let docs = self.documents.first().cloned().unwrap_or_default();
        let dists = self.distances.first().cloned().unwrap_or_default();
        let metas = self.metadatas.first().cloned().unwrap_or_default();
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| Neighbor {
                id,
                document: docs.get(i).cloned().unwrap_or_default(),
                distance: dists.get(i).copied().filter(|d| d.is_finite()),
                metadata: metas.get(i).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
}

struct StoreInner {
    http: reqwest::Client,
    base_url: String,
    embedder: Arc<dyn EmbeddingProvider>,
    // collection name -> server-side collection id
    collection_ids: DashMap<String, String>,
}

/// Client for the vector store; cheap to clone and safe for concurrent use
#[derive(Clone)]
pub struct VectorStore {
    inner: Arc<StoreInner>,
}

impl VectorStore {
    pub fn new(settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                http: reqwest::Client::new(),
                base_url: settings.vector_store_url.trim_end_matches('/').to_string(),
                embedder,
                collection_ids: DashMap::new(),
            }),
        }
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        self.inner.embedder.clone()
    }

    /// Final collection name: base suffixed with the embedding identity
    pub fn collection_name(&self, base: &str) -> String {
        let identity = self.inner.embedder.identity();
        let suffix = UNSAFE_CHARS
            .replace_all(&identity, "_")
            .trim_matches('_')
            .to_string();
        if suffix.is_empty() {
            base.to_string()
        } else {
            format!("{base}__{suffix}")
        }
    }

    /// Get or create a collection handle
    pub async fn collection(&self, base_name: &str) -> Result<Collection> {
        let name = self.collection_name(base_name);
        if let Some(id) = self.inner.collection_ids.get(&name) {
            return Ok(Collection {
                store: self.inner.clone(),
                id: id.value().clone(),
                name,
            });
        }
        let url = format!("{}/api/v1/collections", self.inner.base_url);
        let body = json!({
            "name": name,
            "get_or_create": true,
            "metadata": {
                "hnsw:space": "cosine",
                "embedding_id": self.inner.embedder.identity(),
            },
        });
        let response = self.inner.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        let info: CollectionInfo = response
            .json()
            .await
            .context("collection response malformed")?;
        debug!("resolved collection name={} id={}", name, info.id);
        self.inner.collection_ids.insert(name.clone(), info.id.clone());
        Ok(Collection {
            store: self.inner.clone(),
            id: info.id,
            name,
        })
    }
}

/// Handle for a single collection
#[derive(Clone)]
pub struct Collection {
    store: Arc<StoreInner>,
    id: String,
    pub name: String,
}

impl Collection {
    async fn post(&self, op: &str, body: Value) -> Result<reqwest::Response, StoreError> {
        let url = format!(
            "{}/api/v1/collections/{}/{}",
            self.store.base_url, self.id, op
        );
        let response = self.store.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Upsert rows; documents are embedded locally when no embeddings are given
    pub async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        embeddings: Option<Vec<Vec<f32>>>,
        metadatas: Vec<Map<String, Value>>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let embeddings = match embeddings {
            Some(e) => e,
            None => self.store.embedder.embed(documents).await?,
        };
        self.post(
            "upsert",
            json!({
                "ids": ids,
                "documents": documents,
                "embeddings": embeddings,
                "metadatas": metadatas,
            }),
        )
        .await
        .with_context(|| format!("upsert failed collection={}", self.name))?;
        Ok(())
    }

    pub async fn get(
        &self,
        ids: Option<&[String]>,
        where_filter: Option<Value>,
        limit: Option<usize>,
        include: &[&str],
    ) -> Result<CollectionGet> {
        let mut body = Map::new();
        if let Some(ids) = ids {
            body.insert("ids".to_string(), json!(ids));
        }
        if let Some(filter) = where_filter {
            body.insert("where".to_string(), filter);
        }
        if let Some(limit) = limit {
            body.insert("limit".to_string(), json!(limit));
        }
        body.insert("include".to_string(), json!(include));
        let response = self
            .post("get", Value::Object(body))
            .await
            .with_context(|| format!("get failed collection={}", self.name))?;
        let parsed: CollectionGet = response.json().await.context("get response malformed")?;
        Ok(parsed)
    }

    /// Nearest-neighbor query by embedding; empty-index errors yield no hits
    pub async fn query_embeddings(
        &self,
        embeddings: &[Vec<f32>],
        n_results: usize,
        where_filter: Option<Value>,
        include: &[&str],
    ) -> Result<CollectionQuery> {
        let mut body = Map::new();
        body.insert("query_embeddings".to_string(), json!(embeddings));
        body.insert("n_results".to_string(), json!(n_results.max(1)));
        if let Some(filter) = where_filter {
            body.insert("where".to_string(), filter);
        }
        body.insert("include".to_string(), json!(include));
        match self.post("query", Value::Object(body)).await {
            Ok(response) => {
                let parsed: CollectionQuery =
                    response.json().await.context("query response malformed")?;
                Ok(parsed)
            }
            Err(e) if e.is_empty_index() => {
                debug!("empty index on query collection={}", self.name);
                Ok(CollectionQuery::default())
            }
            Err(e) => Err(e).with_context(|| format!("query failed collection={}", self.name)),
        }
    }

    /// Nearest-neighbor query by text; embeds locally first
    pub async fn query_texts(
        &self,
        texts: &[String],
        n_results: usize,
        where_filter: Option<Value>,
        include: &[&str],
    ) -> Result<CollectionQuery> {
        let embeddings = self.store.embedder.embed(texts).await?;
        self.query_embeddings(&embeddings, n_results, where_filter, include)
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        let url = format!(
            "{}/api/v1/collections/{}/count",
            self.store.base_url, self.id
        );
        let response = self.store.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        let count: usize = response.json().await.context("count response malformed")?;
        Ok(count)
    }

    pub async fn update_metadatas(
        &self,
        ids: &[String],
        metadatas: Vec<Map<String, Value>>,
    ) -> Result<()> {
        self.post("update", json!({"ids": ids, "metadatas": metadatas}))
            .await
            .with_context(|| format!("update failed collection={}", self.name))?;
        Ok(())
    }
}
