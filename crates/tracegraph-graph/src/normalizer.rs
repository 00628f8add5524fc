//! Span normalizer: raw trace records -> typed [`CallEvent`]s.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tracegraph_core::{CallEvent, Result, SpanRecord, TraceGraphError, TraceRecord};
use tracing::{debug, warn};

/// Outcome of normalizing a batch of raw records.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub traces: Vec<TraceRecord>,
    pub events: Vec<CallEvent>,
    /// Records rejected as malformed; the rest of the batch is unaffected.
    pub rejected: Vec<TraceGraphError>,
}

impl NormalizedBatch {
    /// Latest trace start time among the accepted records.
    pub fn max_start_time(&self) -> Option<i64> {
        self.traces.iter().map(|t| t.start_time).max()
    }
}

/// Zero or one event per span: spans without a resolvable `CHILD_OF` parent,
/// and parent/child pairs within one service, produce nothing.
pub fn normalize_trace(trace: &TraceRecord) -> Vec<CallEvent> {
    let by_id: HashMap<&str, &SpanRecord> = trace
        .spans
        .iter()
        .map(|span| (span.span_id.as_str(), span))
        .collect();

    trace
        .spans
        .iter()
        .filter_map(|span| {
            let parent_id = span.parent_span_id()?;
            let Some(parent) = by_id.get(parent_id) else {
                debug!(
                    trace_id = %trace.trace_id,
                    span_id = %span.span_id,
                    "parent span {} not present in trace",
                    parent_id
                );
                return None;
            };
            CallEvent::new(
                trace.service_for(&parent.process_id),
                trace.service_for(&span.process_id),
                span.duration,
                span.is_error(),
            )
        })
        .collect()
}

/// Validate and normalize one raw record.
pub fn normalize_raw(raw: &JsonValue) -> Result<(TraceRecord, Vec<CallEvent>)> {
    let trace = TraceRecord::from_value(raw)?;
    let events = normalize_trace(&trace);
    Ok((trace, events))
}

/// Normalize a batch, skipping malformed records instead of failing the run.
pub fn normalize_batch(raws: &[JsonValue]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for raw in raws {
        match normalize_raw(raw) {
            Ok((trace, events)) => {
                batch.events.extend(events);
                batch.traces.push(trace);
            }
            Err(e) => {
                warn!("Skipping trace record: {}", e);
                batch.rejected.push(e);
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(spans: JsonValue) -> JsonValue {
        json!({
            "traceID": "abc",
            "processes": {
                "p1": {"serviceName": "gateway"},
                "p2": {"serviceName": "users"},
                "p3": {"serviceName": "gateway"}
            },
            "spans": spans
        })
    }

    fn child(id: &str, process: &str, parent: &str, duration: u64) -> JsonValue {
        json!({
            "spanID": id, "processID": process, "duration": duration,
            "references": [{"refType": "CHILD_OF", "spanID": parent}]
        })
    }

    #[test]
    fn parent_child_pair_yields_event() {
        let raw = trace(json!([
            {"spanID": "root", "processID": "p1", "duration": 900},
            child("c1", "p2", "root", 120)
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert_eq!(
            events,
            vec![CallEvent::new("gateway", "users", 120, false).unwrap()]
        );
    }

    #[test]
    fn root_spans_and_follows_from_produce_nothing() {
        let raw = trace(json!([
            {"spanID": "root", "processID": "p1"},
            {"spanID": "f", "processID": "p2",
             "references": [{"refType": "FOLLOWS_FROM", "spanID": "root"}]}
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn first_child_of_reference_wins() {
        let raw = trace(json!([
            {"spanID": "a", "processID": "p1"},
            {"spanID": "b", "processID": "p2"},
            {"spanID": "c", "processID": "p3", "references": [
                {"refType": "FOLLOWS_FROM", "spanID": "a"},
                {"refType": "CHILD_OF", "spanID": "b"},
                {"refType": "CHILD_OF", "spanID": "a"}
            ]}
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].parent_service, "users");
        assert_eq!(events[0].child_service, "gateway");
    }

    #[test]
    fn same_service_pairs_are_discarded() {
        let raw = trace(json!([
            {"spanID": "root", "processID": "p1"},
            child("c1", "p3", "root", 10)
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_process_uses_placeholder_service() {
        let raw = trace(json!([
            {"spanID": "root", "processID": "p1"},
            child("c1", "p42", "root", 10)
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert_eq!(events[0].child_service, "unknown:p42");
    }

    #[test]
    fn error_tag_marks_event() {
        let raw = trace(json!([
            {"spanID": "root", "processID": "p1"},
            {"spanID": "c", "processID": "p2", "duration": 5,
             "tags": [{"key": "error", "value": "true"}],
             "references": [{"refType": "CHILD_OF", "spanID": "root"}]}
        ]));
        let (_, events) = normalize_raw(&raw).unwrap();
        assert!(events[0].is_error);
    }

    #[test]
    fn batch_skips_malformed_records() {
        let good = trace(json!([
            {"spanID": "root", "processID": "p1", "startTime": 10},
            {"spanID": "c1", "processID": "p2", "startTime": 12, "duration": 1,
             "references": [{"refType": "CHILD_OF", "spanID": "root"}]}
        ]));
        let bad = json!({"traceID": "broken", "processes": "nope", "spans": []});

        let batch = normalize_batch(&[bad, good]);
        assert_eq!(batch.traces.len(), 1);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert!(batch.rejected[0].is_malformed_trace());
        assert_eq!(batch.max_start_time(), Some(10));
    }
}
