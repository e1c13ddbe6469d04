//! Stream broker (Redis)
//!
//! Thin async wrapper over the operations the pipeline needs: append-only
//! streams with consumer groups, TTL hashes, sets, sorted sets, atomic
//! counters, and `SET NX EX` cooldown keys. All writes are idempotent or
//! append-only; at-least-once delivery comes from the consumer-group PEL.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, Value};
use tracing::{debug, info, warn};

/// The shared ingress stream every producer appends to
pub const LOGS_STREAM: &str = "logs";

/// One decoded stream entry
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Async broker handle; cheap to clone
#[derive(Clone)]
pub struct Broker {
    conn: ConnectionManager,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Data(bytes) => String::from_utf8_lossy(bytes).to_string(),
        Value::Status(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Nil => String::new(),
        other => format!("{other:?}"),
    }
}

impl Broker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { conn })
    }

    /// Block until the broker answers PING, with capped backoff
    pub async fn wait_ready(&self) {
        let mut delay = Duration::from_millis(500);
        loop {
            let mut conn = self.conn.clone();
            match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                Ok(_) => return,
                Err(e) => {
                    debug!("broker not ready yet: {}", e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    /// Append fields to a stream, returning the generated `<ms>-<seq>` id
    pub async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(stream, "*", fields)
            .await
            .with_context(|| format!("xadd failed stream={stream}"))?;
        Ok(id)
    }

    /// Append with at-least-once semantics: wait for readiness and retry once
    /// on transport failure.
    pub async fn append_with_retry(&self, stream: &str, fields: &[(String, String)]) -> Result<String> {
        match self.append(stream, fields).await {
            Ok(id) => Ok(id),
            Err(first) => {
                warn!("append failed stream={}, retrying after reconnect: {first:#}", stream);
                self.wait_ready().await;
                self.append(stream, fields).await
            }
        }
    }

    /// Create a consumer group at `$` with MKSTREAM; an existing group is fine
    pub async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => {
                info!("consumer group created stream={} group={}", stream, group);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                info!("consumer group exists stream={} group={}", stream, group);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("xgroup create failed stream={stream}")),
        }
    }

    /// Read new messages for a consumer group (`>` cursor)
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .with_context(|| format!("xreadgroup failed stream={stream} group={group}"))?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let fields = entry
                    .map
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect();
                messages.push(StreamMessage {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    pub async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, group, ids)
            .await
            .with_context(|| format!("xack failed stream={stream} group={group}"))?;
        Ok(())
    }

    /// Newest-first range scan, bounded
    pub async fn rev_range_count(
        &self,
        stream: &str,
        max: &str,
        min: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(stream, max, min, count)
            .await
            .with_context(|| format!("xrevrange failed stream={stream}"))?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| StreamMessage {
                fields: entry
                    .map
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect(),
                id: entry.id,
            })
            .collect())
    }

    /// Fetch one stream entry by exact id
    pub async fn entry(&self, stream: &str, id: &str) -> Result<Option<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_count(stream, id, id, 1usize)
            .await
            .with_context(|| format!("xrange failed stream={stream}"))?;
        Ok(reply.ids.into_iter().next().map(|entry| StreamMessage {
            fields: entry
                .map
                .iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect(),
            id: entry.id,
        }))
    }

    /// Atomic counter increment
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1i64).await.context("incr failed")?;
        Ok(value)
    }

    /// `SET key 1 NX EX ttl`; returns true when this caller acquired the key
    pub async fn acquire_nx_ttl(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .context("set nx ex failed")?;
        Ok(outcome.is_some())
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .context("setex failed")?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("get failed")?;
        Ok(value)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.context("exists failed")?;
        Ok(exists)
    }

    pub async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(key, fields)
            .await
            .context("hset failed")?;
        Ok(())
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hset(key, field, value).await.context("hset failed")?;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await.context("hgetall failed")?;
        Ok(map)
    }

    pub async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.hincr(key, field, by).await.context("hincrby failed")?;
        Ok(value)
    }

    pub async fn hincr_float(&self, key: &str, field: &str, by: f64) -> Result<f64> {
        let mut conn = self.conn.clone();
        let value: f64 = redis::cmd("HINCRBYFLOAT")
            .arg(key)
            .arg(field)
            .arg(by)
            .query_async(&mut conn)
            .await
            .context("hincrbyfloat failed")?;
        Ok(value)
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(key, ttl_secs as i64)
            .await
            .context("expire failed")?;
        Ok(())
    }

    pub async fn persist(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.persist(key).await.context("persist failed")?;
        Ok(())
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await.context("sadd failed")?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await.context("srem failed")?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = conn.smembers(key).await.context("smembers failed")?;
        Ok(members)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(key, member, score).await.context("zadd failed")?;
        Ok(())
    }

    /// Collect keys matching a pattern via SCAN
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(pattern)
            .await
            .context("scan failed")?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
