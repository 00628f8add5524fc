use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use surrealdb::{engine::any::Any, opt::auth::Root, Error as SurrealError, RecordId, Surreal};
use tokio::sync::Mutex;
use tracegraph_core::{
    raw_start_time, raw_trace_id, DependencyGraph, EdgeStats, GraphStore, RawTraceStore, Result,
    SurrealDbConfig, SyncStateStore, TraceGraphError, TraceSource,
};
use tracing::{debug, info};

/// Property-graph persistence on SurrealDB.
///
/// `service` records are keyed by service name; `calls` relation records are
/// keyed by `source|target` and carry the accumulated edge statistics. Raw
/// traces and the sync cursor live in the same database.
#[derive(Clone)]
pub struct SurrealDbGraphStore {
    db: Arc<Surreal<Any>>,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct CallsRecord {
    id: RecordId,
    #[serde(rename = "in")]
    source: RecordId,
    #[serde(rename = "out")]
    target: RecordId,
    weight: u64,
    latency_sum: u64,
    error_count: u64,
}

#[derive(Debug, Deserialize)]
struct PersistedCall {
    source: String,
    target: String,
    weight: u64,
    latency_sum: u64,
    error_count: u64,
}

#[derive(Debug, Deserialize)]
struct PersistedService {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PersistedTrace {
    payload: JsonValue,
}

impl SurrealDbGraphStore {
    pub async fn connect(config: &SurrealDbConfig) -> Result<Self> {
        info!(
            "Initializing SurrealDB graph store with connection: {}",
            config.connection
        );

        let db: Surreal<Any> = Surreal::init();
        db.connect(&config.connection)
            .await
            .map_err(|e| TraceGraphError::Store(format!("Failed to connect: {}", e)))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username,
                password: password.expose_secret(),
            })
            .await
            .map_err(|e| TraceGraphError::Store(format!("Authentication failed: {}", e)))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                TraceGraphError::Store(format!("Failed to select namespace/database: {}", e))
            })?;

        let store = Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        };
        store.initialize_schema().await?;

        info!("SurrealDB graph store initialized successfully");
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.db
            .query(SCHEMA)
            .await
            .and_then(|response| response.check())
            .map_err(|e| {
                TraceGraphError::Store(format!(
                    "Failed to define schema: {}",
                    truncate_surreal_error(&e)
                ))
            })?;
        Ok(())
    }

    fn calls_id(source: &str, target: &str) -> RecordId {
        RecordId::from_table_key("calls", format!("{source}|{target}"))
    }

    fn service_id(name: &str) -> RecordId {
        RecordId::from_table_key("service", name)
    }
}

#[async_trait]
impl GraphStore for SurrealDbGraphStore {
    async fn merge(&self, delta: &DependencyGraph) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let services: Vec<String> = delta.services().map(str::to_string).collect();
        let mut edge_ids = Vec::with_capacity(delta.edge_count());
        let edges: Vec<CallsRecord> = delta
            .edges()
            .map(|(source, target, stats)| {
                let id = Self::calls_id(source, target);
                edge_ids.push(id.clone());
                CallsRecord {
                    id,
                    source: Self::service_id(source),
                    target: Self::service_id(target),
                    weight: stats.weight,
                    latency_sum: stats.latency_sum,
                    error_count: stats.error_count,
                }
            })
            .collect();
        let edge_count = edges.len();

        let _guard = self.write_lock.lock().await;
        self.db
            .query(MERGE_QUERY)
            .bind(("services", services))
            .bind(("edges", edges))
            .bind(("edge_ids", edge_ids))
            .await
            .and_then(|response| response.check())
            .map_err(|e| {
                TraceGraphError::Store(format!(
                    "Failed to merge delta graph ({} edges): {}",
                    edge_count,
                    truncate_surreal_error(&e)
                ))
            })?;

        debug!("Merged {} edges into SurrealDB", edge_count);
        Ok(())
    }

    async fn fetch_all(&self) -> Result<DependencyGraph> {
        let mut response = self
            .db
            .query(FETCH_SERVICES_QUERY)
            .query(FETCH_CALLS_QUERY)
            .await
            .map_err(|e| {
                TraceGraphError::Store(format!(
                    "Failed to fetch graph: {}",
                    truncate_surreal_error(&e)
                ))
            })?;

        let services: Vec<PersistedService> = response.take(0).map_err(|e| {
            TraceGraphError::Store(format!("Failed to read services: {}", e))
        })?;
        let calls: Vec<PersistedCall> = response
            .take(1)
            .map_err(|e| TraceGraphError::Store(format!("Failed to read calls: {}", e)))?;

        let mut graph = DependencyGraph::new();
        for service in &services {
            graph.add_service(&service.name);
        }
        for call in &calls {
            graph.add_edge_stats(
                &call.source,
                &call.target,
                EdgeStats::new(call.weight, call.latency_sum, call.error_count),
            );
        }
        graph.recompute_degrees();

        debug!(
            "Fetched {} services / {} calls from SurrealDB",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

#[async_trait]
impl RawTraceStore for SurrealDbGraphStore {
    async fn insert(&self, trace: &JsonValue) -> Result<()> {
        let trace_id = raw_trace_id(trace).map(str::to_string);
        let start_time = raw_start_time(trace);

        let query = match trace_id {
            Some(_) => UPSERT_TRACE_QUERY,
            None => CREATE_TRACE_QUERY,
        };
        self.db
            .query(query)
            .bind(("trace_id", trace_id.unwrap_or_default()))
            .bind(("start_time", start_time))
            .bind(("payload", trace.clone()))
            .await
            .and_then(|response| response.check())
            .map_err(|e| {
                TraceGraphError::Store(format!(
                    "Failed to store trace: {}",
                    truncate_surreal_error(&e)
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl TraceSource for SurrealDbGraphStore {
    async fn list_traces_since(&self, timestamp: i64) -> Result<Vec<JsonValue>> {
        let rows: Vec<PersistedTrace> = self
            .db
            .query(LIST_TRACES_QUERY)
            .bind(("since", timestamp))
            .await
            .map_err(|e| {
                TraceGraphError::Store(format!(
                    "Failed to list traces: {}",
                    truncate_surreal_error(&e)
                ))
            })?
            .take(0)
            .map_err(|e| TraceGraphError::Store(format!("Failed to read traces: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.payload).collect())
    }
}

#[async_trait]
impl SyncStateStore for SurrealDbGraphStore {
    async fn load_cursor(&self) -> Result<Option<i64>> {
        let cursor: Option<i64> = self
            .db
            .query(LOAD_CURSOR_QUERY)
            .await
            .map_err(|e| TraceGraphError::Store(format!("Failed to load cursor: {}", e)))?
            .take(0)
            .map_err(|e| TraceGraphError::Store(format!("Failed to read cursor: {}", e)))?;
        Ok(cursor)
    }

    async fn save_cursor(&self, timestamp: i64) -> Result<()> {
        self.db
            .query(SAVE_CURSOR_QUERY)
            .bind(("ts", timestamp))
            .await
            .and_then(|response| response.check())
            .map_err(|e| TraceGraphError::Store(format!("Failed to save cursor: {}", e)))?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS service SCHEMALESS;
DEFINE TABLE IF NOT EXISTS calls TYPE RELATION SCHEMALESS;
DEFINE TABLE IF NOT EXISTS trace SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_trace_start ON TABLE trace COLUMNS start_time;
DEFINE TABLE IF NOT EXISTS sync_state SCHEMALESS;
"#;

const MERGE_QUERY: &str = r#"
BEGIN TRANSACTION;
FOR $name IN $services {
    UPSERT type::thing('service', $name) SET name = $name;
};
INSERT RELATION INTO calls $edges ON DUPLICATE KEY UPDATE
    weight += $input.weight,
    latency_sum += $input.latency_sum,
    error_count += $input.error_count;
UPDATE $edge_ids SET avg_latency = <float> latency_sum / <float> weight WHERE weight > 0;
COMMIT TRANSACTION;
"#;

const FETCH_SERVICES_QUERY: &str = "SELECT name FROM service;";

const FETCH_CALLS_QUERY: &str = r#"
SELECT in.name AS source, out.name AS target, weight, latency_sum, error_count FROM calls;
"#;

const UPSERT_TRACE_QUERY: &str = r#"
UPSERT type::thing('trace', $trace_id) CONTENT {
    trace_id: $trace_id,
    start_time: $start_time,
    payload: $payload
};
"#;

const CREATE_TRACE_QUERY: &str = r#"
CREATE trace CONTENT { start_time: $start_time, payload: $payload };
"#;

const LIST_TRACES_QUERY: &str = r#"
SELECT payload, start_time FROM trace WHERE start_time > $since ORDER BY start_time ASC;
"#;

const LOAD_CURSOR_QUERY: &str = "SELECT VALUE last_sync_timestamp FROM ONLY sync_state:cursor;";

const SAVE_CURSOR_QUERY: &str = "UPSERT sync_state:cursor SET last_sync_timestamp = $ts;";

fn truncate_surreal_error(e: &SurrealError) -> String {
    const MAX_LEN: usize = 512;
    let mut msg = e.to_string();
    if msg.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
        msg.push('…');
    }
    msg
}
