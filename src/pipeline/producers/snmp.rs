//! SNMP polling producer
//!
//! Polls a configured OID set per host. The SNMP client is synchronous, so
//! each get runs on the blocking pool to keep the I/O loop responsive.
//! Community strings are masked in emitted payloads.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::info;

use super::{emit, Producer, StopFlag};
use crate::infra::broker::Broker;

#[derive(Debug, Clone)]
struct HostConfig {
    host: String,
    community: String,
    port: u16,
}

pub struct SnmpProducer {
    broker: Broker,
    source_id: i64,
    hosts: Vec<HostConfig>,
    oids: Vec<String>,
    interval: Duration,
    timeout: Duration,
    stop: StopFlag,
}

impl SnmpProducer {
    pub fn new(broker: Broker, source_id: i64, config: &Value) -> Self {
        let hosts = config
            .get("hosts")
            .and_then(Value::as_array)
            .map(|hosts| {
                hosts
                    .iter()
                    .filter_map(|h| {
                        let host = h.get("host").and_then(Value::as_str)?.to_string();
                        Some(HostConfig {
                            host,
                            community: h
                                .get("community")
                                .and_then(Value::as_str)
                                .unwrap_or("public")
                                .to_string(),
                            port: h.get("port").and_then(Value::as_u64).unwrap_or(161) as u16,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let oids = config
            .get("oids")
            .and_then(Value::as_array)
            .map(|oids| {
                oids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            broker,
            source_id,
            hosts,
            oids,
            interval: Duration::from_secs_f64(
                config
                    .get("poll_interval_sec")
                    .and_then(Value::as_f64)
                    .unwrap_or(30.0)
                    .max(1.0),
            ),
            timeout: Duration::from_secs_f64(
                config
                    .get("timeout_sec")
                    .and_then(Value::as_f64)
                    .unwrap_or(3.0)
                    .max(0.1),
            ),
            stop: StopFlag::default(),
        }
    }

    async fn poll_host(&self, host_config: HostConfig) -> Result<()> {
        let source = format!("snmp:{}", host_config.host);
        while !self.stop.is_stopped() {
            for oid in &self.oids {
                let value = fetch_oid(
                    host_config.host.clone(),
                    host_config.community.clone(),
                    host_config.port,
                    oid.clone(),
                    self.timeout,
                )
                .await;
                match value {
                    Ok(value) => {
                        let payload = json!({
                            "host": host_config.host,
                            "port": host_config.port,
                            "community": "***",
                            "oid": oid,
                            "value": value,
                        });
                        if let Err(e) = emit(
                            &self.broker,
                            &source,
                            &payload.to_string(),
                            Some(self.source_id),
                        )
                        .await
                        {
                            info!("snmp: emit failed host={} err={:#}", host_config.host, e);
                        }
                    }
                    Err(e) => {
                        info!("snmp: host={} oid={} err={:#}", host_config.host, oid, e)
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }
}

/// Parse a dotted OID string into its numeric components
pub fn parse_oid(oid: &str) -> Option<Vec<u32>> {
    let parts: Result<Vec<u32>, _> = oid
        .split('.')
        .filter(|p| !p.is_empty())
        .map(str::parse)
        .collect();
    parts.ok().filter(|p| !p.is_empty())
}

/// One synchronous SNMP GET, offloaded from the async runtime
async fn fetch_oid(
    host: String,
    community: String,
    port: u16,
    oid: String,
    timeout: Duration,
) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let name =
            parse_oid(&oid).ok_or_else(|| anyhow::anyhow!("invalid oid: {oid}"))?;
        let mut session = snmp::SyncSession::new(
            (host.as_str(), port),
            community.as_bytes(),
            Some(timeout),
            0,
        )
        .map_err(|e| anyhow::anyhow!("snmp session failed: {e}"))?;
        let mut pdu = session
            .get(&name)
            .map_err(|e| anyhow::anyhow!("snmp get failed: {e:?}"))?;
        let value = pdu
            .varbinds
            .next()
            .map(|(_, value)| format_snmp_value(&value))
            .unwrap_or_default();
        Ok(value)
    })
    .await?
}

fn format_snmp_value(value: &snmp::Value) -> String {
    match value {
        snmp::Value::Integer(v) => v.to_string(),
        snmp::Value::OctetString(bytes) => String::from_utf8_lossy(bytes).to_string(),
        snmp::Value::Counter32(v) => v.to_string(),
        snmp::Value::Unsigned32(v) => v.to_string(),
        snmp::Value::Timeticks(v) => v.to_string(),
        snmp::Value::Counter64(v) => v.to_string(),
        snmp::Value::IpAddress(octets) => {
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        snmp::Value::Boolean(v) => v.to_string(),
        other => format!("{other:?}"),
    }
}

#[async_trait]
impl Producer for SnmpProducer {
    fn name(&self) -> &'static str {
        "snmp"
    }

    async fn run(&self) -> Result<()> {
        self.broker.wait_ready().await;
        if self.hosts.is_empty() || self.oids.is_empty() {
            info!("snmp: no hosts or oids configured; idle");
            while !self.stop.is_stopped() {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            return Ok(());
        }
        let polls = self
            .hosts
            .iter()
            .cloned()
            .map(|host| self.poll_host(host));
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
    fn test_parse_oid() {
        assert_eq!(
            parse_oid("1.3.6.1.2.1.1.3.0"),
            Some(vec![1, 3, 6, 1, 2, 1, 1, 3, 0])
        );
        assert_eq!(parse_oid(""), None);
        assert_eq!(parse_oid("1.3.abc"), None);
    }
}
