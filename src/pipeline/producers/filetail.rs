//! File tail producer
//!
//! Emits existing lines once, then follows appends with sub-second polling.
//! Survives deletion/recreation and truncation by reopening from the start.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::info;

use super::{emit, Producer, StopFlag};
use crate::infra::broker::Broker;

const POLL_INTERVAL_MS: u64 = 500;

pub struct FileTail {
    broker: Broker,
    source_id: i64,
    paths: Vec<PathBuf>,
    stop: StopFlag,
}

impl FileTail {
    pub fn new(broker: Broker, source_id: i64, config: &Value) -> Self {
        let paths: Vec<PathBuf> = config
            .get("paths")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![PathBuf::from("data/Linux.log"), PathBuf::from("data/Mac.log")]);
        info!(
            "filetail: configured paths={}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            broker,
            source_id,
            paths,
            stop: StopFlag::default(),
        }
    }

    async fn tail(&self, path: PathBuf) -> Result<()> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        'reopen: while !self.stop.is_stopped() {
            // wait for the file to appear
            while !self.stop.is_stopped() && !path.exists() {
                info!("filetail: waiting for {} to appear", path.display());
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            if self.stop.is_stopped() {
                return Ok(());
            }

            info!("filetail: opening {}", path.display());
            let file = File::open(&path).await?;
            let mut reader = BufReader::new(file);
            let mut position = 0u64;

            // existing content first, then follow appends
            loop {
                if self.stop.is_stopped() {
                    return Ok(());
                }
                let mut line = String::new();
                let read = reader.read_line(&mut line).await?;
                if read == 0 {
                    // at EOF: watch for truncation/recreation while idle
                    tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
                    match tokio::fs::metadata(&path).await {
                        Ok(meta) if meta.len() < position => {
                            info!("filetail: {} truncated; reopening", path.display());
                            continue 'reopen;
                        }
                        Ok(_) => continue,
                        Err(_) => {
                            info!("filetail: {} removed; reopening", path.display());
                            continue 'reopen;
                        }
                    }
                }
                position = reader.stream_position().await.unwrap_or(position + read as u64);
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    emit(&self.broker, &source, trimmed, Some(self.source_id)).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Producer for FileTail {
    fn name(&self) -> &'static str {
        "filetail"
    }

    async fn run(&self) -> Result<()> {
        self.broker.wait_ready().await;
        info!("filetail: starting tails for {} paths", self.paths.len());
        let tails = self.paths.iter().cloned().map(|path| self.tail(path));
        for result in join_all(tails).await {
            result?;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.stop();
    }
}
