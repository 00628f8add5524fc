use crate::{DependencyGraph, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Durable property-graph store holding the persisted dependency graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Additively merge a delta graph. A partially applied merge is an error.
    async fn merge(&self, delta: &DependencyGraph) -> Result<()>;

    /// Materialize every persisted relationship. Never an empty graph on failure.
    async fn fetch_all(&self) -> Result<DependencyGraph>;
}

/// Source of raw trace records, filtered by trace start time.
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn list_traces_since(&self, timestamp: i64) -> Result<Vec<JsonValue>>;
}

/// Persistence for raw trace records on the ingestion path.
#[async_trait]
pub trait RawTraceStore: Send + Sync {
    async fn insert(&self, trace: &JsonValue) -> Result<()>;
}

/// Sync bookkeeping so the cursor survives restarts.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn load_cursor(&self) -> Result<Option<i64>>;
    async fn save_cursor(&self, timestamp: i64) -> Result<()>;
}
