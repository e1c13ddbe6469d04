//! Generic HTTP polling producer
//!
//! Covers `dcim_http` and the vendor polling kinds: each endpoint is fetched
//! periodically and the JSON (or text) body is emitted with a stable
//! `kind:host` source prefix. Vendor auth handshakes happen outside this
//! crate; headers/params come from the source config.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::info;

use super::{emit, Producer, StopFlag};
use crate::infra::broker::Broker;

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    method: String,
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
    body: Option<Value>,
}

pub struct HttpPoller {
    broker: Broker,
    source_id: i64,
    kind: String,
    endpoints: Vec<Endpoint>,
    interval: Duration,
    verify_ssl: bool,
    stop: StopFlag,
}

impl HttpPoller {
    pub fn new(broker: Broker, source_id: i64, kind: &str, config: &Value) -> Self {
        let endpoints = config
            .get("endpoints")
            .and_then(Value::as_array)
            .map(|eps| {
                eps.iter()
                    .filter_map(|ep| {
                        let url = ep.get("url").and_then(Value::as_str)?.to_string();
                        Some(Endpoint {
                            url,
                            method: ep
                                .get("method")
                                .and_then(Value::as_str)
                                .unwrap_or("GET")
                                .to_uppercase(),
                            headers: string_map(ep.get("headers")),
                            params: string_map(ep.get("params")),
                            body: ep.get("data").cloned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let interval = config
            .get("poll_interval_sec")
            .and_then(Value::as_f64)
            .unwrap_or(30.0);
        Self {
            broker,
            source_id,
            kind: kind.to_string(),
            endpoints,
            interval: Duration::from_secs_f64(interval.max(1.0)),
            verify_ssl: config
                .get("verify_ssl")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            stop: StopFlag::default(),
        }
    }

    fn source_for(&self, url: &str) -> String {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        format!("{}:{}", self.kind, host)
    }

    async fn poll_endpoint(&self, client: reqwest::Client, endpoint: Endpoint) -> Result<()> {
        let source = self.source_for(&endpoint.url);
        while !self.stop.is_stopped() {
            let method = reqwest::Method::from_bytes(endpoint.method.as_bytes())
                .unwrap_or(reqwest::Method::GET);
            let mut request = client.request(method, &endpoint.url).query(&endpoint.params);
            for (key, value) in &endpoint.headers {
                request = request.header(key, value);
            }
            if let Some(body) = &endpoint.body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let text = response.text().await.unwrap_or_default();
                        let body: Value = serde_json::from_str(&text)
                            .unwrap_or_else(|_| Value::String(text.clone()));
                        let payload = json!({
                            "url": endpoint.url,
                            "status": status,
                            "body": body,
                        });
                        if let Err(e) = emit(
                            &self.broker,
                            &source,
                            &payload.to_string(),
                            Some(self.source_id),
                        )
                        .await
                        {
                            info!("{}: emit failed url={} err={:#}", self.kind, endpoint.url, e);
                        }
                    }
                    Err(e) => info!("{}: request error url={} err={}", self.kind, endpoint.url, e),
                },
                Err(e) => info!("{}: request error url={} err={}", self.kind, endpoint.url, e),
            }
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }
}

fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Producer for HttpPoller {
    fn name(&self) -> &'static str {
        "http_poller"
    }

    async fn run(&self) -> Result<()> {
        self.broker.wait_ready().await;
        if self.endpoints.is_empty() {
            info!("{}: no endpoints configured; idle", self.kind);
            while !self.stop.is_stopped() {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()?;
        let polls = self
            .endpoints
            .iter()
            .cloned()
            .map(|endpoint| self.poll_endpoint(client.clone(), endpoint));
        for result in join_all(polls).await {
            result?;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker_free_poller(kind: &str, config: Value) -> (Vec<Endpoint>, Duration) {
        // exercise the config parsing without a live broker
        let endpoints = config
            .get("endpoints")
            .and_then(Value::as_array)
            .map(|eps| {
                eps.iter()
                    .filter_map(|ep| {
                        let url = ep.get("url").and_then(Value::as_str)?.to_string();
                        Some(Endpoint {
                            url,
                            method: "GET".to_string(),
                            headers: string_map(ep.get("headers")),
                            params: string_map(ep.get("params")),
                            body: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let _ = kind;
        (endpoints, Duration::from_secs(30))
    }

    #[test]
    fn test_endpoint_parsing() {
        let (endpoints, _) = broker_free_poller(
            "dcim_http",
            json!({
                "endpoints": [
                    {"url": "https://dcim/api/sensors", "headers": {"Authorization": "Bearer x"}},
                    {"url": "https://dcim/api/alarms"},
                    {"not_a_url": true},
                ],
            }),
        );
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].headers["Authorization"], "Bearer x");
    }
}
