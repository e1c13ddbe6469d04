//! Embedding providers
//!
//! Text -> dense vector, pluggable behind a trait. Collection names are
//! suffixed with the provider identity so switching models can never mix
//! vector dimensions inside one collection.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::common::config::Settings;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity (provider + model) used to namespace collections
    fn identity(&self) -> String;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("embedding provider returned no vector"))
    }
}

/// Build the configured provider
pub fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.embedding_provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(
            &settings.openai_base_url,
            settings.openai_api_key.clone(),
            &settings.openai_embedding_model,
        ))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            &settings.ollama_base_url,
            &settings.ollama_embedding_model,
        ))),
        other => Err(anyhow!(
            "Unknown embedding_provider '{other}'. Supported: openai, ollama"
        )),
    }
}

/// Remote embedding API (OpenAI-compatible `/v1/embeddings`)
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn identity(&self) -> String {
        format!("openai_{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .json(&json!({"model": self.model, "input": texts}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding request rejected")?;
        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .context("embedding response malformed")?;
        debug!("embedded batch count={} model={}", texts.len(), self.model);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Local model served by Ollama (`/api/embeddings`, one prompt per call)
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn identity(&self) -> String {
        format!("ollama_{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .http
                .post(&url)
                .json(&json!({"model": self.model, "prompt": text}))
                .send()
                .await
                .context("embedding request failed")?
                .error_for_status()
                .context("embedding request rejected")?;
            let parsed: OllamaEmbeddingResponse = response
                .json()
                .await
                .context("embedding response malformed")?;
            vectors.push(parsed.embedding);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_includes_model() {
        let embedder = OpenAiEmbedder::new("https://api.openai.com", None, "text-embedding-3-small");
        assert_eq!(embedder.identity(), "openai_text-embedding-3-small");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let settings = Settings {
            embedding_provider: "word2vec".to_string(),
            ..Settings::default()
        };
        assert!(provider_from_settings(&settings).is_err());
    }
}
