use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracegraph_core::TraceRecord;

/// Call statistics for one operation of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub service: String,
    pub operation: String,
    pub call_count: u64,
    pub error_count: u64,
    pub total_duration: u64,
    pub avg_duration: f64,
}

/// Group every span by `(service, operation)`; busiest endpoints first.
pub fn analyze_endpoint_usage(traces: &[TraceRecord]) -> Vec<EndpointUsage> {
    let mut usage: BTreeMap<(String, String), (u64, u64, u64)> = BTreeMap::new();

    for trace in traces {
        for span in &trace.spans {
            let key = (
                trace.service_for(&span.process_id),
                span.operation_name.clone(),
            );
            let entry = usage.entry(key).or_default();
            entry.0 += 1;
            entry.1 += u64::from(span.is_error());
            entry.2 = entry.2.saturating_add(span.duration);
        }
    }

    let mut endpoints: Vec<EndpointUsage> = usage
        .into_iter()
        .map(
            |((service, operation), (call_count, error_count, total_duration))| EndpointUsage {
                service,
                operation,
                call_count,
                error_count,
                total_duration,
                avg_duration: total_duration as f64 / call_count as f64,
            },
        )
        .collect();

    // Stable sort keeps the (service, operation) order among ties
    endpoints.sort_by(|a, b| b.call_count.cmp(&a.call_count));
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn groups_by_service_and_operation() {
        let raw = json!({
            "traceID": "t",
            "processes": {"p1": {"serviceName": "api"}, "p2": {"serviceName": "db"}},
            "spans": [
                {"spanID": "1", "processID": "p1", "operationName": "GET /users", "duration": 10},
                {"spanID": "2", "processID": "p1", "operationName": "GET /users", "duration": 30,
                 "tags": [{"key": "error", "value": true}]},
                {"spanID": "3", "processID": "p2", "operationName": "query", "duration": 5},
                {"spanID": "4", "processID": "p1", "operationName": "GET /health", "duration": 1}
            ]
        });
        let trace = TraceRecord::from_value(&raw).unwrap();
        let usage = analyze_endpoint_usage(&[trace]);

        assert_eq!(usage.len(), 3);
        assert_eq!(usage[0].service, "api");
        assert_eq!(usage[0].operation, "GET /users");
        assert_eq!(usage[0].call_count, 2);
        assert_eq!(usage[0].error_count, 1);
        assert_eq!(usage[0].avg_duration, 20.0);
        // Ties keep key order
        assert_eq!(usage[1].operation, "GET /health");
        assert_eq!(usage[2].service, "db");
    }

    #[test]
    fn no_traces_no_usage() {
        assert!(analyze_endpoint_usage(&[]).is_empty());
    }
}
