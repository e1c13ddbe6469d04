//! Redfish polling producer
//!
//! Polls BMC endpoints directly: Managers log services become log lines on
//! the stream, Chassis Thermal/Power become metric payloads. Per-URL
//! high-watermark cursors skip entries already emitted; the first poll
//! backfills only the `since_minutes` window.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::info;

use super::{emit, Producer, StopFlag};
use crate::infra::broker::Broker;

pub struct RedfishProducer {
    broker: Broker,
    source_id: i64,
    kind: String,
    hosts: Vec<String>,
    interval: Duration,
    since_minutes: i64,
    verify_ssl: bool,
    auth: Option<(String, String)>,
    // high-watermark cursor per (host, entries url)
    last_log_time: Mutex<HashMap<String, String>>,
    stop: StopFlag,
}

impl RedfishProducer {
    pub fn new(broker: Broker, source_id: i64, kind: &str, config: &Value) -> Self {
        let hosts = config
            .get("hosts")
            .and_then(Value::as_array)
            .map(|hosts| {
                hosts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|h| h.trim_end_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_default();
        let auth = config.get("auth").and_then(|auth| {
            let username = auth.get("username").and_then(Value::as_str)?;
            let password = auth.get("password").and_then(Value::as_str).unwrap_or("");
            Some((username.to_string(), password.to_string()))
        });
        Self {
            broker,
            source_id,
            kind: kind.to_string(),
            hosts,
            interval: Duration::from_secs_f64(
                config
                    .get("poll_interval_sec")
                    .and_then(Value::as_f64)
                    .unwrap_or(60.0)
                    .max(1.0),
            ),
            since_minutes: config
                .get("since_minutes")
                .and_then(Value::as_i64)
                .unwrap_or(30),
            verify_ssl: config
                .get("verify_ssl")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            auth,
            last_log_time: Mutex::new(HashMap::new()),
            stop: StopFlag::default(),
        }
    }

    fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        let normalized = if let Some(stripped) = trimmed.strip_suffix('Z') {
            format!("{stripped}+00:00")
        } else {
            trimmed.to_string()
        };
        DateTime::parse_from_rfc3339(&normalized).ok()
    }

    async fn fetch_json(&self, client: &reqwest::Client, url: &str) -> Result<Value> {
        let mut request = client.get(url);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request failed url={url}"))?
            .error_for_status()
            .with_context(|| format!("request rejected url={url}"))?;
        response.json().await.context("response not json")
    }

    fn member_paths(index: &Value) -> Vec<String> {
        index
            .get("Members")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| m.get("@odata.id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn poll_host(&self, client: reqwest::Client, base: String) -> Result<()> {
        while !self.stop.is_stopped() {
            let mut new_logs = 0usize;
            let mut metric_payloads = 0usize;

            // logs: Managers/*/LogServices/*/Entries
            match self.fetch_json(&client, &format!("{base}/redfish/v1/Managers")).await {
                Ok(managers) => {
                    for manager_path in Self::member_paths(&managers) {
                        let Ok(services) = self
                            .fetch_json(&client, &format!("{base}{manager_path}/LogServices"))
                            .await
                        else {
                            continue;
                        };
                        for service_path in Self::member_paths(&services) {
                            let entries_url = format!("{base}{service_path}/Entries");
                            new_logs += self
                                .collect_and_emit_entries(&client, &base, &entries_url)
                                .await;
                        }
                    }
                }
                Err(e) => info!("redfish: managers fetch failed host={} err={:#}", base, e),
            }

            // metrics: Chassis/* Thermal and Power
            match self.fetch_json(&client, &format!("{base}/redfish/v1/Chassis")).await {
                Ok(chassis) => {
                    for chassis_path in Self::member_paths(&chassis) {
                        for kind in ["Thermal", "Power"] {
                            let Ok(body) = self
                                .fetch_json(&client, &format!("{base}{chassis_path}/{kind}"))
                                .await
                            else {
                                continue;
                            };
                            let payload = json!({
                                "host": base,
                                "kind": kind.to_lowercase(),
                                "body": body,
                            });
                            if emit(
                                &self.broker,
                                &format!("{}:{}", self.kind, base),
                                &payload.to_string(),
                                Some(self.source_id),
                            )
                            .await
                            .is_ok()
                            {
                                metric_payloads += 1;
                            }
                        }
                    }
                }
                Err(e) => info!("redfish: chassis fetch failed host={} err={:#}", base, e),
            }

            info!(
                "redfish: host={} poll logs={} metrics_payloads={}",
                base, new_logs, metric_payloads
            );
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }

    /// Emit entries newer than the cursor; the first poll backfills the
    /// configured window only. Advances the cursor to the newest emitted.
    async fn collect_and_emit_entries(
        &self,
        client: &reqwest::Client,
        key: &str,
        entries_url: &str,
    ) -> usize {
        let data = match self.fetch_json(client, entries_url).await {
            Ok(data) => data,
            Err(e) => {
                info!("redfish: entries fetch failed key={} url={} err={:#}", key, entries_url, e);
                return 0;
            }
        };
        let mut members: Vec<Value> = data
            .get("Members")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        members.sort_by_key(|m| entry_created(m));

        let cursor_key = format!("{key}:{entries_url}");
        let last_seen = self
            .last_log_time
            .lock()
            .get(&cursor_key)
            .cloned()
            .unwrap_or_default();
        let mut newest = last_seen.clone();
        let backfill_threshold = if last_seen.is_empty() && self.since_minutes > 0 {
            Some(Utc::now() - ChronoDuration::minutes(self.since_minutes))
        } else {
            None
        };

        let mut emitted = 0usize;
        for item in &members {
            let created = entry_created(item);
            let message = entry_message(item);
            if message.is_empty() {
                continue;
            }
            if !created.is_empty() && !last_seen.is_empty() && created <= last_seen {
                continue;
            }
            if let Some(threshold) = backfill_threshold {
                if let Some(created_at) = Self::parse_time(&created) {
                    if created_at.with_timezone(&Utc) < threshold {
                        continue;
                    }
                }
            }
            let line = format!("{created} {message}").trim().to_string();
            if emit(
                &self.broker,
                &format!("redfish_log:{key}"),
                &line,
                Some(self.source_id),
            )
            .await
            .is_ok()
            {
                emitted += 1;
            }
            if !created.is_empty() && created > newest {
                newest = created;
            }
        }

        if !newest.is_empty() {
            self.last_log_time.lock().insert(cursor_key, newest);
        }
        if emitted > 0 {
            info!("redfish: key={} emitted_log_entries={}", key, emitted);
        }
        emitted
    }
}

fn entry_created(item: &Value) -> String {
    item.get("Created")
        .or_else(|| item.get("CreatedDateTime"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn entry_message(item: &Value) -> String {
    item.get("Message")
        .or_else(|| item.get("LogEntry"))
        .or_else(|| item.get("Description"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

#[async_trait]
impl Producer for RedfishProducer {
    fn name(&self) -> &'static str {
        "redfish"
    }

    async fn run(&self) -> Result<()> {
        self.broker.wait_ready().await;
        info!(
            "redfish: starting verify_ssl={} hosts={}",
            self.verify_ssl,
            self.hosts.len()
        );
        if self.hosts.is_empty() {
            // avoid a tight restart loop when misconfigured
            info!("redfish: no hosts configured; idle");
            while !self.stop.is_stopped() {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()?;
        let polls = self
            .hosts
            .iter()
            .cloned()
            .map(|host| self.poll_host(client.clone(), host));
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

    #[test]
    fn test_parse_time_handles_trailing_z() {
        let parsed = RedfishProducer::parse_time("2026-07-31T10:00:00Z").unwrap();
        assert_eq!(parsed.timezone().local_minus_utc(), 0);
        assert!(RedfishProducer::parse_time("").is_none());
        assert!(RedfishProducer::parse_time("not a time").is_none());
    }

    #[test]
    fn test_entry_extraction() {
        let item = json!({"Created": "2026-07-31T10:00:00Z", "Message": " Fan failure "});
        assert_eq!(entry_created(&item), "2026-07-31T10:00:00Z");
        assert_eq!(entry_message(&item), "Fan failure");
        let alt = json!({"CreatedDateTime": "x", "Description": "d"});
        assert_eq!(entry_created(&alt), "x");
        assert_eq!(entry_message(&alt), "d");
    }
}
