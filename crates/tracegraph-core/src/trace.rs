//! Typed representation of raw trace records.
//!
//! Trace records arrive as loosely shaped JSON (the Jaeger query API export,
//! or the same documents after a round trip through a document store). They
//! are validated once into [`TraceRecord`] so that the rest of the engine
//! never touches untyped maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{Result, TraceGraphError};

/// Reference type marking direct parent/child causality.
pub const CHILD_OF: &str = "CHILD_OF";

/// Tag key flagging a failed span.
pub const ERROR_TAG: &str = "error";

/// Prefix of the synthetic service name assigned to unknown process ids.
pub const UNKNOWN_SERVICE_PREFIX: &str = "unknown:";

const TRACE_ID_KEYS: &[&str] = &["traceID", "trace_id", "traceId"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanTag {
    pub key: String,
    pub value: JsonValue,
}

impl SpanTag {
    /// `true`, `"true"` (any case), `"1"` and non-zero numbers are truthy.
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            JsonValue::Bool(b) => *b,
            JsonValue::String(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            JsonValue::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanReference {
    pub ref_type: String,
    pub span_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub process_id: String,
    pub operation_name: String,
    pub start_time: i64,
    pub duration: u64,
    pub tags: Vec<SpanTag>,
    pub references: Vec<SpanReference>,
}

impl SpanRecord {
    /// First `CHILD_OF` reference, if any.
    pub fn parent_span_id(&self) -> Option<&str> {
        self.references
            .iter()
            .find(|r| r.ref_type == CHILD_OF)
            .map(|r| r.span_id.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.key == ERROR_TAG && tag.is_truthy())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    /// Earliest span start time, or 0 for a trace without spans.
    pub start_time: i64,
    pub processes: BTreeMap<String, String>,
    pub spans: Vec<SpanRecord>,
}

impl TraceRecord {
    /// Validate a raw record into the typed representation.
    ///
    /// The record is rejected with [`TraceGraphError::MalformedTrace`] when
    /// `processes` is not a mapping, `spans` is not a sequence, or a span is
    /// not an object carrying a string `spanID`. Missing optional fields fall
    /// back to empty values.
    pub fn from_value(raw: &JsonValue) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| TraceGraphError::malformed("<unknown>", "record is not an object"))?;

        let trace_id = str_field(obj, TRACE_ID_KEYS)
            .unwrap_or("<unknown>")
            .to_string();

        let processes = match obj.get("processes") {
            Some(JsonValue::Object(map)) => parse_processes(map),
            Some(_) => {
                return Err(TraceGraphError::malformed(
                    trace_id,
                    "`processes` is not a mapping",
                ))
            }
            None => return Err(TraceGraphError::malformed(trace_id, "missing `processes`")),
        };

        let raw_spans = match obj.get("spans") {
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                return Err(TraceGraphError::malformed(
                    trace_id,
                    "`spans` is not a sequence",
                ))
            }
            None => return Err(TraceGraphError::malformed(trace_id, "missing `spans`")),
        };

        let mut spans = Vec::with_capacity(raw_spans.len());
        for (idx, raw_span) in raw_spans.iter().enumerate() {
            let span = parse_span(raw_span).ok_or_else(|| {
                TraceGraphError::malformed(trace_id.clone(), format!("span #{idx} is invalid"))
            })?;
            spans.push(span);
        }

        let start_time = spans.iter().map(|s| s.start_time).min().unwrap_or(0);

        Ok(Self {
            trace_id,
            start_time,
            processes,
            spans,
        })
    }

    /// Service name for a process id; unknown ids get a synthetic placeholder.
    pub fn service_for(&self, process_id: &str) -> String {
        match self.processes.get(process_id) {
            Some(name) => name.clone(),
            None => format!("{UNKNOWN_SERVICE_PREFIX}{process_id}"),
        }
    }
}

/// Start time used by trace stores to index a raw record.
///
/// Agrees with [`TraceRecord::start_time`] for every record that parses.
/// Malformed records fall back to their earliest readable span start, so they
/// still reach the normalizer and get counted as skipped; records without any
/// span list sort before every cursor value.
pub fn raw_start_time(raw: &JsonValue) -> i64 {
    if let Ok(trace) = TraceRecord::from_value(raw) {
        return trace.start_time;
    }
    raw.get("spans")
        .and_then(JsonValue::as_array)
        .and_then(|spans| {
            spans
                .iter()
                .filter_map(|span| span.as_object().map(span_start_time))
                .min()
        })
        .unwrap_or(i64::MIN)
}

/// Trace id of a raw record, under any of the accepted key spellings.
pub fn raw_trace_id(raw: &JsonValue) -> Option<&str> {
    raw.as_object()
        .and_then(|obj| str_field(obj, TRACE_ID_KEYS))
}

fn span_start_time(span: &Map<String, JsonValue>) -> i64 {
    span.get("startTime")
        .or_else(|| span.get("start_time"))
        .and_then(parse_i64)
        .unwrap_or(0)
}

fn str_field<'a>(obj: &'a Map<String, JsonValue>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(JsonValue::as_str))
}

fn parse_processes(map: &Map<String, JsonValue>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(pid, process)| {
            let name = match process {
                JsonValue::Object(p) => str_field(p, &["serviceName", "service_name"])?,
                JsonValue::String(s) => s.as_str(),
                _ => return None,
            };
            Some((pid.clone(), name.to_string()))
        })
        .collect()
}

fn parse_span(raw: &JsonValue) -> Option<SpanRecord> {
    let obj = raw.as_object()?;
    let span_id = str_field(obj, &["spanID", "span_id", "spanId"])?.to_string();
    let process_id = str_field(obj, &["processID", "process_id", "processId"])
        .unwrap_or_default()
        .to_string();
    let operation_name = str_field(obj, &["operationName", "operation_name"])
        .unwrap_or_default()
        .to_string();
    let start_time = span_start_time(obj);
    let duration = obj
        .get("duration")
        .and_then(parse_i64)
        .map(|d| d.max(0) as u64)
        .unwrap_or(0);

    let tags = obj
        .get("tags")
        .and_then(JsonValue::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| {
                    let key = tag.get("key")?.as_str()?.to_string();
                    let value = tag.get("value").cloned().unwrap_or(JsonValue::Null);
                    Some(SpanTag { key, value })
                })
                .collect()
        })
        .unwrap_or_default();

    let references = obj
        .get("references")
        .and_then(JsonValue::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| {
                    let r = r.as_object()?;
                    Some(SpanReference {
                        ref_type: str_field(r, &["refType", "ref_type"])?.to_string(),
                        span_id: str_field(r, &["spanID", "span_id", "spanId"])?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SpanRecord {
        span_id,
        process_id,
        operation_name,
        start_time,
        duration,
        tags,
        references,
    })
}

/// Integers may be plain numbers, numeric strings, or `{"$numberLong": "..."}`.
fn parse_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Object(map) => map.get("$numberLong").and_then(parse_i64),
        _ => None,
    }
}
