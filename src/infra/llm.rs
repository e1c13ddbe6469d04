//! LLM providers and classification prompts
//!
//! The provider contract is strict-JSON chat completion; failures come back
//! as `{error, raw}` values instead of errors so downstream alerts always
//! carry something an operator can read.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::common::config::Settings;
use crate::schemas::alerts::taxonomy_spec;
use crate::schemas::logs::CandidateLog;
use crate::infra::vector_store::Neighbor;

const SYSTEM: &str = "You are an SRE assistant. Respond ONLY with valid JSON.";

/// Outcome of one chat call, including usage for cost accounting
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub value: Value,
    pub tokens_used: u64,
    pub latency_ms: f64,
    pub success: bool,
}

impl ChatOutcome {
    fn failure(raw: impl Into<String>, error: &str, latency_ms: f64) -> Self {
        Self {
            value: json!({"error": error, "raw": raw.into()}),
            tokens_used: 0,
            latency_ms,
            success: false,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Structured-JSON chat completion; never errors, failures are encoded
    /// as `{error, raw}` in the returned value.
    async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> ChatOutcome;
}

pub fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    match settings.llm_provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(
            &settings.openai_base_url,
            settings.openai_api_key.clone(),
            &settings.openai_chat_model,
        ))),
        "ollama" => Ok(Arc::new(OllamaChat::new(
            &settings.ollama_base_url,
            &settings.ollama_chat_model,
        ))),
        other => Err(anyhow!(
            "Unknown llm_provider '{other}'. Supported: openai, ollama"
        )),
    }
}

/// OpenAI-compatible chat completions with enforced JSON object output
pub struct OpenAiChat {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChat {
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
impl LlmProvider for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> ChatOutcome {
        let started = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let elapsed = |s: Instant| s.elapsed().as_secs_f64() * 1000.0;
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                error!("LLM chat failed model={} err={}", self.model, e);
                return ChatOutcome::failure(e.to_string(), "LLM API call failed", elapsed(started));
            }
        };
        if !response.status().is_success() {
            let raw = response.text().await.unwrap_or_default();
            error!("LLM chat rejected model={} body={}", self.model, raw);
            return ChatOutcome::failure(raw, "LLM API call failed", elapsed(started));
        }
        let parsed: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ChatOutcome::failure(e.to_string(), "LLM response malformed", elapsed(started))
            }
        };
        let tokens = parsed
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let content = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        match serde_json::from_str::<Value>(content) {
            Ok(value) => ChatOutcome {
                value,
                tokens_used: tokens,
                latency_ms: elapsed(started),
                success: true,
            },
            Err(_) => ChatOutcome::failure(content, "LLM returned invalid JSON", elapsed(started)),
        }
    }
}

/// Local model served by Ollama with enforced JSON format
pub struct OllamaChat {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> ChatOutcome {
        let started = Instant::now();
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "options": {"temperature": temperature},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let elapsed = |s: Instant| s.elapsed().as_secs_f64() * 1000.0;
        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("LLM chat failed model={} err={}", self.model, e);
                return ChatOutcome::failure(e.to_string(), "LLM API call failed", elapsed(started));
            }
        };
        if !response.status().is_success() {
            let raw = response.text().await.unwrap_or_default();
            return ChatOutcome::failure(raw, "LLM API call failed", elapsed(started));
        }
        let parsed: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ChatOutcome::failure(e.to_string(), "LLM response malformed", elapsed(started))
            }
        };
        let tokens = parsed.get("eval_count").and_then(Value::as_u64).unwrap_or(0)
            + parsed
                .get("prompt_eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
        let content = parsed
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        match serde_json::from_str::<Value>(content) {
            Ok(value) => ChatOutcome {
                value,
                tokens_used: tokens,
                latency_ms: elapsed(started),
                success: true,
            },
            Err(_) => ChatOutcome::failure(content, "LLM returned invalid JSON", elapsed(started)),
        }
    }
}

/// High-level classification operations over a chat provider
#[derive(Clone)]
pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Generate HyDE-style retrieval queries from an issue summary and logs.
    /// Accepts either `{"queries": [...]}` or a bare JSON array; degrades to
    /// an empty list so retrieval continues without amplification.
    pub async fn generate_hypothesis(
        &self,
        os_name: &str,
        templated_summary: &str,
        top_logs: &[CandidateLog],
        num_queries: usize,
    ) -> (Vec<String>, ChatOutcome) {
        let snippets: Vec<String> = top_logs
            .iter()
            .take(20)
            .map(|l| format!("- {}", l.templated))
            .collect();
        let prompt = format!(
            "OS: {os_name}\n\
             Issue summary (templated):\n{templated_summary}\n\n\
             Key logs (templated):\n{}\n\n\
             Write {num_queries} short search queries (max 12 words each) that would \
             retrieve additional logs relevant to diagnosing this issue. \
             Return JSON list of strings only.",
            snippets.join("\n"),
        );
        let outcome = self.provider.chat_json(SYSTEM, &prompt, 0.2).await;
        let queries = parse_queries(&outcome.value, num_queries);
        (queries, outcome)
    }

    /// Classify an aggregated issue into the alert schema
    pub async fn classify_issue(
        &self,
        os_name: &str,
        top_logs: &[CandidateLog],
        neighbors: &[Neighbor],
        retrieved_logs: &[CandidateLog],
    ) -> ChatOutcome {
        let examples: Vec<String> = neighbors
            .iter()
            .take(8)
            .map(|n| format!("- {}", n.document))
            .collect();
        let recent: Vec<String> = top_logs
            .iter()
            .take(50)
            .map(|l| format!("- {}", l.templated))
            .collect();
        let extra: Vec<String> = retrieved_logs
            .iter()
            .take(20)
            .map(|l| format!("- {}", l.templated))
            .collect();
        let prompt = format!(
            "OS: {os_name}\n\
             Issue logs (templated):\n{}\n\n\
             Similar known templates/logs:\n{}\n\n\
             Additional retrieved logs:\n{}\n\n\
             Return JSON with:\n\
             {{\n\
               \"is_hardware_failure\": true|false,\n\
               \"failure_type\": \"{}\",\n\
               \"confidence\": 0..1,\n\
               \"top_signals\": [\"...\"],\n\
               \"summary\": \"...\",\n\
               \"recommendation\": \"...\"\n\
             }}\n\
             Only JSON; no extra text.",
            recent.join("\n"),
            examples.join("\n"),
            extra.join("\n"),
            taxonomy_spec(),
        );
        self.provider.chat_json(SYSTEM, &prompt, 0.3).await
    }

    /// Classify a cluster by its medoid and members
    pub async fn classify_cluster(
        &self,
        os_name: &str,
        cluster_id: &str,
        medoid_document: &str,
        neighbors: &[Neighbor],
        retrieved_logs: &[CandidateLog],
    ) -> ChatOutcome {
        let examples: Vec<String> = neighbors
            .iter()
            .take(8)
            .map(|n| format!("- {}", n.document))
            .collect();
        let members: Vec<String> = retrieved_logs
            .iter()
            .take(20)
            .map(|l| format!("- {}", l.templated))
            .collect();
        let prompt = format!(
            "OS: {os_name}\n\
             Cluster: {cluster_id}\n\
             Representative log (medoid, templated):\n{medoid_document}\n\n\
             Similar known templates/logs:\n{}\n\n\
             Member logs:\n{}\n\n\
             Return JSON with:\n\
             {{\n\
               \"is_hardware_failure\": true|false,\n\
               \"failure_type\": \"{}\",\n\
               \"confidence\": 0..1,\n\
               \"top_signals\": [\"...\"],\n\
               \"summary\": \"...\",\n\
               \"recommendation\": \"...\"\n\
             }}\n\
             Only JSON; no extra text.",
            examples.join("\n"),
            members.join("\n"),
            taxonomy_spec(),
        );
        self.provider.chat_json(SYSTEM, &prompt, 0.3).await
    }

    /// Minimal call to verify provider availability
    pub async fn healthcheck(&self) -> bool {
        let outcome = self
            .provider
            .chat_json(
                "You are a healthcheck. Respond with JSON.",
                "Return {\"ok\": true} as valid JSON only.",
                0.0,
            )
            .await;
        let ok = outcome.value.get("ok").and_then(Value::as_bool) == Some(true);
        if ok {
            info!("LLM health ok model={}", self.provider.model());
        } else {
            error!(
                "LLM health failed model={} resp={}",
                self.provider.model(),
                outcome.value
            );
        }
        ok
    }
}

/// Extract query strings from a hypothesis response
pub fn parse_queries(value: &Value, num_queries: usize) -> Vec<String> {
    let list = match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("queries").and_then(Value::as_array),
        _ => None,
    };
    let Some(items) = list else {
        debug!("hypothesis response had no queries");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|q| q.as_str().map(str::to_string))
        .take(num_queries)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queries_bare_array() {
        let value = json!(["disk errors sda", "smartd failure", "raid degraded", "extra"]);
        let queries = parse_queries(&value, 3);
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "disk errors sda");
    }

    #[test]
    fn test_parse_queries_wrapped_object() {
        let value = json!({"queries": ["a", "b"]});
        assert_eq!(parse_queries(&value, 3), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_queries_degrades_to_empty() {
        assert!(parse_queries(&json!({"error": "x"}), 3).is_empty());
        assert!(parse_queries(&json!("plain"), 3).is_empty());
    }
}
