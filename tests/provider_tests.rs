//! Embedding and LLM provider contracts against a mock HTTP server.

use log_sentinel::infra::embedding::{EmbeddingProvider, OpenAiEmbedder};
use log_sentinel::infra::llm::{LlmProvider, OllamaChat, OpenAiChat};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_openai_embedder_parses_vectors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [0.1, 0.2, 0.3]},
                {"embedding": [0.4, 0.5, 0.6]},
            ],
            "model": "text-embedding-3-small",
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(&server.uri(), Some("key".into()), "text-embedding-3-small");
    let vectors = embedder
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn test_openai_embedder_rejection_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(&server.uri(), None, "text-embedding-3-small");
    assert!(embedder.embed(&["a".to_string()]).await.is_err());
}

#[tokio::test]
async fn test_openai_chat_strict_json() {
    let server = MockServer::start().await;
    let content = json!({
        "is_hardware_failure": true,
        "failure_type": "disk",
        "confidence": 0.9,
        "top_signals": ["smartd"],
        "summary": "disk failing",
        "recommendation": "replace disk",
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": content.to_string()}}],
            "usage": {"total_tokens": 321},
        })))
        .mount(&server)
        .await;

    let chat = OpenAiChat::new(&server.uri(), Some("key".into()), "gpt-4o-mini");
    let outcome = chat.chat_json("system", "user", 0.2).await;
    assert!(outcome.success);
    assert_eq!(outcome.tokens_used, 321);
    assert_eq!(outcome.value["failure_type"], "disk");
    assert_eq!(outcome.value["confidence"], 0.9);
}

#[tokio::test]
async fn test_openai_chat_invalid_json_becomes_error_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "this is not json"}}],
            "usage": {"total_tokens": 10},
        })))
        .mount(&server)
        .await;

    let chat = OpenAiChat::new(&server.uri(), None, "gpt-4o-mini");
    let outcome = chat.chat_json("system", "user", 0.0).await;
    assert!(!outcome.success);
    assert_eq!(outcome.value["raw"], "this is not json");
    assert!(outcome.value.get("error").is_some());
}

#[tokio::test]
async fn test_openai_chat_transport_failure_becomes_error_result() {
    // nothing listening on this port
    let chat = OpenAiChat::new("http://127.0.0.1:9", None, "gpt-4o-mini");
    let outcome = chat.chat_json("system", "user", 0.0).await;
    assert!(!outcome.success);
    assert!(outcome.value.get("error").is_some());
    assert!(outcome.value.get("raw").is_some());
}

#[tokio::test]
async fn test_ollama_chat_json_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "{\"queries\": [\"disk errors\"]}"},
            "eval_count": 50,
            "prompt_eval_count": 150,
        })))
        .mount(&server)
        .await;

    let chat = OllamaChat::new(&server.uri(), "llama3.1");
    let outcome = chat.chat_json("system", "user", 0.2).await;
    assert!(outcome.success);
    assert_eq!(outcome.tokens_used, 200);
    assert_eq!(outcome.value["queries"][0], "disk errors");
}
