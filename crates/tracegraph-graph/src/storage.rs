//! In-process store backends.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use tracegraph_core::{
    raw_start_time, raw_trace_id, DependencyGraph, GraphStore, RawTraceStore, Result,
    SyncStateStore, TraceSource,
};
use tracing::debug;

/// Persisted graph held in memory. Merges take the write lock, so they are
/// serialized; `fetch_all` calls only contend on the read lock.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<DependencyGraph>,
    cursor: Mutex<Option<i64>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn merge(&self, delta: &DependencyGraph) -> Result<()> {
        let mut graph = self.graph.write();
        graph.merge(delta);
        debug!(
            "Merged delta ({} edges) into in-memory graph ({} edges)",
            delta.edge_count(),
            graph.edge_count()
        );
        Ok(())
    }

    async fn fetch_all(&self) -> Result<DependencyGraph> {
        let mut graph = self.graph.read().clone();
        graph.recompute_degrees();
        Ok(graph)
    }
}

#[async_trait]
impl SyncStateStore for InMemoryGraphStore {
    async fn load_cursor(&self) -> Result<Option<i64>> {
        Ok(*self.cursor.lock())
    }

    async fn save_cursor(&self, timestamp: i64) -> Result<()> {
        *self.cursor.lock() = Some(timestamp);
        Ok(())
    }
}

/// Raw trace records kept in memory, indexed by trace start time.
#[derive(Debug, Default)]
pub struct InMemoryTraceStore {
    traces: RwLock<Vec<(i64, JsonValue)>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.read().is_empty()
    }
}

#[async_trait]
impl RawTraceStore for InMemoryTraceStore {
    async fn insert(&self, trace: &JsonValue) -> Result<()> {
        let start = raw_start_time(trace);
        let mut traces = self.traces.write();
        // Re-ingesting a trace replaces it
        if let Some(id) = raw_trace_id(trace) {
            traces.retain(|(_, t)| raw_trace_id(t) != Some(id));
        }
        let at = traces.partition_point(|(t, _)| *t <= start);
        traces.insert(at, (start, trace.clone()));
        Ok(())
    }
}

#[async_trait]
impl TraceSource for InMemoryTraceStore {
    async fn list_traces_since(&self, timestamp: i64) -> Result<Vec<JsonValue>> {
        Ok(self
            .traces
            .read()
            .iter()
            .filter(|(start, _)| *start > timestamp)
            .map(|(_, trace)| trace.clone())
            .collect())
    }
}
