//! Reading trace exports from disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use tracegraph_core::TraceRecord;
use tracing::{debug, warn};

/// Trace records from a Jaeger-style export: `{"data": [...]}`, a bare
/// array, or a single trace object.
pub fn unwrap_trace_document(doc: JsonValue) -> Vec<JsonValue> {
    match doc {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) if map.get("data").is_some_and(JsonValue::is_array) => {
            match map.remove("data") {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        other => vec![other],
    }
}

pub async fn read_trace_file(path: &Path) -> Result<Vec<JsonValue>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read trace file {}", path.display()))?;
    let doc: JsonValue = serde_json::from_str(&text)
        .with_context(|| format!("Trace file {} is not valid JSON", path.display()))?;
    let traces = unwrap_trace_document(doc);
    debug!("Read {} trace records from {}", traces.len(), path.display());
    Ok(traces)
}

pub async fn read_trace_files(paths: &[PathBuf]) -> Result<Vec<JsonValue>> {
    let mut traces = Vec::new();
    for path in paths {
        traces.extend(read_trace_file(path).await?);
    }
    Ok(traces)
}

/// Typed records, dropping the malformed ones.
pub fn parse_records(raws: &[JsonValue]) -> Vec<TraceRecord> {
    raws.iter()
        .filter_map(|raw| match TraceRecord::from_value(raw) {
            Ok(trace) => Some(trace),
            Err(e) => {
                warn!("Skipping trace record: {}", e);
                None
            }
        })
        .collect()
}
