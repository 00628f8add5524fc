//! Incremental sync: trace source -> normalizer -> aggregator -> graph store,
//! gated by the [`SyncCursor`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracegraph_core::{
    GraphStore, NodeLinkGraph, RawTraceStore, Result, SyncStateStore, TraceSource,
};
use tracing::{info, warn};

use crate::aggregator::aggregate;
use crate::anti_patterns::{detect_anti_patterns, AntiPatternFinding};
use crate::coupling::{calculate_ais, calculate_all_ais};
use crate::normalizer::normalize_batch;
use crate::sync_cursor::SyncCursor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub traces_fetched: usize,
    pub traces_skipped: usize,
    pub events: usize,
    pub edges_merged: usize,
    /// Cursor value after the run.
    pub cursor: i64,
    pub completed_at: DateTime<Utc>,
}

pub struct SyncPipeline {
    source: Arc<dyn TraceSource>,
    store: Arc<dyn GraphStore>,
    cursor: Arc<SyncCursor>,
    state: Option<Arc<dyn SyncStateStore>>,
    run_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn TraceSource>, store: Arc<dyn GraphStore>) -> Self {
        Self {
            source,
            store,
            cursor: Arc::new(SyncCursor::new()),
            state: None,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_cursor(mut self, cursor: Arc<SyncCursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Persist the cursor after every successful run.
    pub fn with_state_store(mut self, state: Arc<dyn SyncStateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn cursor(&self) -> &Arc<SyncCursor> {
        &self.cursor
    }

    /// Load the persisted cursor, if any, into the in-process cursor.
    pub async fn restore_cursor(&self) -> Result<i64> {
        if let Some(state) = &self.state {
            if let Some(saved) = state.load_cursor().await? {
                self.cursor.advance(saved);
                info!("Restored sync cursor at {}", saved);
            }
        }
        Ok(self.cursor.get())
    }

    /// One aggregation-and-merge cycle over traces newer than the cursor.
    ///
    /// The cursor moves only after the merge succeeded; a merge error is
    /// returned as is and the same traces are picked up by the next run.
    pub async fn run_once(&self) -> Result<SyncReport> {
        let _running = self.run_lock.lock().await;

        let since = self.cursor.get();
        let raws = self.source.list_traces_since(since).await?;
        if raws.is_empty() {
            info!("No new traces to process");
            return Ok(self.report(0, 0, 0, 0));
        }

        let batch = normalize_batch(&raws);
        if !batch.rejected.is_empty() {
            warn!(
                "{} of {} trace records were malformed and skipped",
                batch.rejected.len(),
                raws.len()
            );
        }

        let delta = aggregate(&batch.events);
        self.store.merge(&delta).await?;

        if let Some(latest) = batch.max_start_time() {
            let cursor = self.cursor.advance(latest);
            if let Some(state) = &self.state {
                state.save_cursor(cursor).await?;
            }
        }

        let report = self.report(
            raws.len(),
            batch.rejected.len(),
            batch.events.len(),
            delta.edge_count(),
        );
        info!(
            "Dependency graph updated: {} traces, {} events, {} edges (cursor {})",
            report.traces_fetched, report.events, report.edges_merged, report.cursor
        );
        Ok(report)
    }

    fn report(
        &self,
        traces_fetched: usize,
        traces_skipped: usize,
        events: usize,
        edges_merged: usize,
    ) -> SyncReport {
        SyncReport {
            traces_fetched,
            traces_skipped,
            events,
            edges_merged,
            cursor: self.cursor.get(),
            completed_at: Utc::now(),
        }
    }
}

/// Persist raw records on the ingestion path; returns how many were stored.
pub async fn ingest_traces(store: &dyn RawTraceStore, traces: &[JsonValue]) -> Result<usize> {
    for trace in traces {
        store.insert(trace).await?;
    }
    info!("Ingested {} trace records", traces.len());
    Ok(traces.len())
}

/// Persisted graph in node-link form.
pub async fn dependency_graph(store: &dyn GraphStore) -> Result<NodeLinkGraph> {
    Ok(store.fetch_all().await?.to_node_link())
}

/// Anti-pattern findings over the persisted graph.
pub async fn detect_from_store(store: &dyn GraphStore) -> Result<Vec<AntiPatternFinding>> {
    let graph = store.fetch_all().await?;
    Ok(detect_anti_patterns(&graph))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AisResult {
    Single(f64),
    All(BTreeMap<String, f64>),
}

/// AIS of one service, or of every service when `service` is `None`.
pub async fn importance_from_store(
    store: &dyn GraphStore,
    service: Option<&str>,
) -> Result<AisResult> {
    let graph = store.fetch_all().await?;
    match service {
        Some(name) => Ok(AisResult::Single(calculate_ais(name, &graph)?)),
        None => Ok(AisResult::All(calculate_all_ais(&graph))),
    }
}
