//! Template ingestion
//!
//! Seeds `templates_<os>` collections from Drain-style template CSVs
//! (`EventId`, `EventTemplate` columns).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use crate::common::config::Settings;
use crate::infra::vector_store::VectorStore;

/// Read template rows from a CSV file; rows without a template are skipped
/// and missing event ids are auto-assigned.
pub fn read_templates(csv_path: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open template csv {}", csv_path.display()))?;
    let headers = reader.headers()?.clone();
    let id_col = headers.iter().position(|h| h == "EventId");
    let template_col = headers.iter().position(|h| h == "EventTemplate");

    let mut ids = Vec::new();
    let mut texts = Vec::new();
    for record in reader.records() {
        let record = record?;
        let template = template_col
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .trim()
            .to_string();
        if template.is_empty() {
            continue;
        }
        let event_id = id_col
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .trim()
            .to_string();
        ids.push(if event_id.is_empty() {
            format!("auto_{}", ids.len())
        } else {
            event_id
        });
        texts.push(template);
    }
    Ok((ids, texts))
}

/// Upsert one CSV of templates into `templates_<os>`
pub async fn ingest_csv_to_collection(
    store: &VectorStore,
    settings: &Settings,
    os_name: &str,
    csv_path: &Path,
) -> Result<usize> {
    let (ids, texts) = read_templates(csv_path)?;
    if texts.is_empty() {
        return Ok(0);
    }
    let collection = store
        .collection(&settings.templates_collection(os_name))
        .await?;
    let metadatas: Vec<Map<String, Value>> = ids
        .iter()
        .map(|event_id| {
            let mut map = Map::new();
            map.insert("os".to_string(), Value::String(os_name.to_string()));
            map.insert(
                "source".to_string(),
                Value::String(csv_path.display().to_string()),
            );
            map.insert("event_id".to_string(), Value::String(event_id.clone()));
            map
        })
        .collect();
    collection.upsert(&ids, &texts, None, metadatas).await?;
    info!(
        "ingested templates os={} file={} count={}",
        os_name,
        csv_path.display(),
        texts.len()
    );
    Ok(texts.len())
}

/// Ingest every known per-OS template file found under a directory
pub async fn ingest_all_data_dir(
    store: &VectorStore,
    settings: &Settings,
    data_dir: &Path,
) -> Result<HashMap<String, usize>> {
    let mapping = [
        ("macos", "Mac_2k.log_templates.csv"),
        ("linux", "Linux_2k.log_templates.csv"),
        ("windows", "Windows_2k.log_templates.csv"),
    ];
    let mut report = HashMap::new();
    for (os_name, filename) in mapping {
        let csv_path = data_dir.join(filename);
        if csv_path.exists() {
            let count = ingest_csv_to_collection(store, settings, os_name, &csv_path).await?;
            report.insert(os_name.to_string(), count);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_templates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LineId,EventId,EventTemplate").unwrap();
        writeln!(file, "1,E1,session opened for user <*>").unwrap();
        writeln!(file, "2,,authentication failure").unwrap();
        writeln!(file, "3,E3,").unwrap();
        let (ids, texts) = read_templates(file.path()).unwrap();
        assert_eq!(texts.len(), 2);
        assert_eq!(ids[0], "E1");
        assert_eq!(ids[1], "auto_1");
        assert_eq!(texts[0], "session opened for user <*>");
    }
}
