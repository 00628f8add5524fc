mod trace_files;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracegraph_core::{
    ConfigManager, DatabaseBackend, GraphStore, RawTraceStore, Settings, SyncStateStore,
    TraceSource,
};
use tracegraph_graph::{
    analyze_endpoint_usage, dependency_graph, detect_from_store, importance_from_store,
    ingest_traces, AisResult, InMemoryGraphStore, InMemoryTraceStore, SyncPipeline,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::trace_files::{parse_records, read_trace_files};

#[derive(Parser)]
#[command(name = "tracegraph")]
#[command(about = "TraceGraph CLI - Service dependency graphs from distributed traces", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Directory holding default.toml / <env>.toml
    #[arg(long, global = true, env = "TRACEGRAPH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration environment (overrides APP_ENV)
    #[arg(long, global = true)]
    env: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Store raw trace records from Jaeger JSON exports
    Ingest {
        /// Trace export files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Aggregate traces newer than the sync cursor into the persisted graph
    Sync {
        /// Ingest these export files before syncing
        #[arg(short, long, num_args = 1..)]
        traces: Vec<PathBuf>,
    },

    /// Print the persisted dependency graph (node-link form)
    Graph {
        /// Sync these export files first
        #[arg(short, long, num_args = 1..)]
        traces: Vec<PathBuf>,
    },

    /// Detect architectural anti-patterns
    Patterns {
        /// Sync these export files first
        #[arg(short, long, num_args = 1..)]
        traces: Vec<PathBuf>,
    },

    /// Absolute Importance Score of one or all services
    Ais {
        /// Service name; all services when omitted
        #[arg(short, long)]
        service: Option<String>,

        /// Sync these export files first
        #[arg(short, long, num_args = 1..)]
        traces: Vec<PathBuf>,
    },

    /// Per-endpoint call statistics of trace export files
    Endpoints {
        /// Trace export files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Serialize)]
struct IngestResult {
    files: usize,
    traces_ingested: usize,
    backend: DatabaseBackend,
}

/// Store handles for the configured backend.
struct Stores {
    graph: Arc<dyn GraphStore>,
    traces: Arc<dyn TraceSource>,
    raw: Arc<dyn RawTraceStore>,
    state: Arc<dyn SyncStateStore>,
}

impl Stores {
    fn in_memory() -> Self {
        let graph = Arc::new(InMemoryGraphStore::new());
        let traces = Arc::new(InMemoryTraceStore::new());
        Self {
            graph: graph.clone(),
            state: graph,
            traces: traces.clone(),
            raw: traces,
        }
    }

    #[cfg(feature = "surrealdb")]
    async fn surrealdb(settings: &Settings) -> Result<Self> {
        let store = Arc::new(
            tracegraph_graph::SurrealDbGraphStore::connect(&settings.database.surrealdb)
                .await
                .context("Failed to connect to SurrealDB")?,
        );
        Ok(Self {
            graph: store.clone(),
            traces: store.clone(),
            raw: store.clone(),
            state: store,
        })
    }

    #[cfg(not(feature = "surrealdb"))]
    async fn surrealdb(_settings: &Settings) -> Result<Self> {
        anyhow::bail!("SurrealDB backend not available; rebuild with `--features surrealdb`")
    }

    async fn open(settings: &Settings) -> Result<Self> {
        match settings.database.backend {
            DatabaseBackend::Memory => Ok(Self::in_memory()),
            DatabaseBackend::SurrealDb => Self::surrealdb(settings).await,
        }
    }
}

struct AppContext {
    settings: Settings,
    stores: Stores,
    timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry TRACEGRAPH_CONFIG_DIR, so load it before parsing
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match ConfigManager::load(cli.config_dir.clone(), cli.env.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    init_tracing(&settings, cli.verbose);

    match execute_command(&cli, settings).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        settings.logging.level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

impl AppContext {
    async fn open(settings: Settings) -> Result<Self> {
        let stores = Stores::open(&settings).await?;
        if settings.database.backend == DatabaseBackend::Memory {
            info!("Using the in-memory backend; nothing is kept after this command exits");
        }
        Ok(Self {
            timeout: Duration::from_secs(settings.sync.timeout_secs),
            settings,
            stores,
        })
    }
}

async fn execute_command(cli: &Cli, settings: Settings) -> Result<serde_json::Value> {
    match &cli.command {
        Commands::Config => Ok(serde_json::to_value(&settings)?),
        Commands::Endpoints { files } => execute_endpoints_command(files).await,
        Commands::Ingest { files } => {
            execute_ingest_command(&AppContext::open(settings).await?, files).await
        }
        Commands::Sync { traces } => {
            execute_sync_command(&AppContext::open(settings).await?, traces).await
        }
        Commands::Graph { traces } => {
            let ctx = AppContext::open(settings).await?;
            sync_files(&ctx, traces).await?;
            let doc = bounded(
                ctx.timeout,
                "Graph fetch",
                dependency_graph(ctx.stores.graph.as_ref()),
            )
            .await?;
            Ok(serde_json::to_value(doc)?)
        }
        Commands::Patterns { traces } => {
            let ctx = AppContext::open(settings).await?;
            sync_files(&ctx, traces).await?;
            let findings = bounded(
                ctx.timeout,
                "Anti-pattern detection",
                detect_from_store(ctx.stores.graph.as_ref()),
            )
            .await?;
            Ok(serde_json::to_value(findings)?)
        }
        Commands::Ais { service, traces } => {
            let ctx = AppContext::open(settings).await?;
            sync_files(&ctx, traces).await?;
            let scores = bounded(
                ctx.timeout,
                "AIS calculation",
                importance_from_store(ctx.stores.graph.as_ref(), service.as_deref()),
            )
            .await?;
            match (service, scores) {
                (Some(name), AisResult::Single(score)) => {
                    Ok(serde_json::json!({ "service": name, "ais": score }))
                }
                (_, scores) => Ok(serde_json::to_value(scores)?),
            }
        }
    }
}

/// Bound a store call by the configured timeout.
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = tracegraph_core::Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .with_context(|| format!("{what} timed out after {}s", limit.as_secs()))?
        .with_context(|| format!("{what} failed"))
}

async fn execute_ingest_command(ctx: &AppContext, files: &[PathBuf]) -> Result<serde_json::Value> {
    let traces = read_trace_files(files).await?;
    let ingested = bounded(
        ctx.timeout,
        "Trace ingestion",
        ingest_traces(ctx.stores.raw.as_ref(), &traces),
    )
    .await?;
    if ctx.settings.database.backend == DatabaseBackend::Memory {
        warn!("Ingested traces are lost on exit with the in-memory backend");
    }

    Ok(serde_json::to_value(IngestResult {
        files: files.len(),
        traces_ingested: ingested,
        backend: ctx.settings.database.backend,
    })?)
}

async fn execute_sync_command(ctx: &AppContext, files: &[PathBuf]) -> Result<serde_json::Value> {
    if !files.is_empty() {
        let traces = read_trace_files(files).await?;
        bounded(
            ctx.timeout,
            "Trace ingestion",
            ingest_traces(ctx.stores.raw.as_ref(), &traces),
        )
        .await?;
    }

    let pipeline = SyncPipeline::new(ctx.stores.traces.clone(), ctx.stores.graph.clone())
        .with_state_store(ctx.stores.state.clone());
    bounded(ctx.timeout, "Cursor restore", pipeline.restore_cursor()).await?;
    let report = bounded(ctx.timeout, "Sync", pipeline.run_once()).await?;

    let mut value = serde_json::to_value(&report)?;
    if let serde_json::Value::Object(map) = &mut value {
        let cursor_at = pipeline
            .cursor()
            .as_datetime()
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "beginning of time".to_string());
        map.insert("cursor_at".to_string(), cursor_at.into());
    }
    Ok(value)
}

/// `--traces` on read commands: ingest and sync before reading.
async fn sync_files(ctx: &AppContext, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    execute_sync_command(ctx, files).await.map(|_| ())
}

async fn execute_endpoints_command(files: &[PathBuf]) -> Result<serde_json::Value> {
    let raws = read_trace_files(files).await?;
    let records = parse_records(&raws);
    Ok(serde_json::to_value(analyze_endpoint_usage(&records))?)
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}{}: {}", indent, key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}{}: {}", indent, key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b {
                            "true".green()
                        } else {
                            "false".red()
                        };
                        println!("{}{}: {}", indent, key_colored, val_colored);
                    }
                    serde_json::Value::Null => {
                        println!("{}{}: {}", indent, key_colored, "-".dimmed());
                    }
                    nested => {
                        println!("{}{}:", indent, key_colored);
                        print_pretty(nested, depth + 1)?;
                    }
                }
            }
        }
        serde_json::Value::Array(arr) if arr.is_empty() => {
            println!("{}{}", indent, "(none)".dimmed());
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                match item {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{}{}{}:", indent, "#".cyan(), (i + 1).to_string().yellow());
                        print_pretty(item, depth + 1)?;
                    }
                    scalar => println!("{}- {}", indent, scalar),
                }
            }
        }
        scalar => {
            println!("{}{}", indent, scalar);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn export_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let doc = json!({"data": [{
            "traceID": "t1",
            "processes": {"p1": {"serviceName": "order"}, "p2": {"serviceName": "payment"}},
            "spans": [
                {"spanID": "a", "processID": "p1", "operationName": "POST /orders", "startTime": 10, "duration": 500},
                {"spanID": "b", "processID": "p2", "operationName": "charge", "startTime": 11, "duration": 200,
                 "references": [{"refType": "CHILD_OF", "spanID": "a"}]}
            ]
        }]});
        write!(file, "{}", doc).unwrap();
        file
    }

    fn memory_ctx() -> AppContext {
        AppContext {
            settings: Settings::default(),
            stores: Stores::in_memory(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["tracegraph", "ais", "--service", "payment", "-o", "json"])
                .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Ais { service: Some(ref s), .. } if s == "payment"));
    }

    #[test]
    fn ingest_requires_files() {
        assert!(Cli::try_parse_from(["tracegraph", "ingest"]).is_err());
    }

    #[tokio::test]
    async fn sync_reports_cursor_and_merged_edges() {
        let file = export_file();
        let ctx = memory_ctx();
        let value = execute_sync_command(&ctx, &[file.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(value["edges_merged"], 1);
        assert_eq!(value["cursor"], 10);
        assert!(value["cursor_at"].as_str().unwrap().starts_with("1970-01-01"));
    }

    #[tokio::test]
    async fn endpoints_are_computed_from_files() {
        let file = export_file();
        let value = execute_endpoints_command(&[file.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn timeouts_surface_as_errors() {
        let err = bounded(Duration::from_millis(10), "Slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, tracegraph_core::TraceGraphError>(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
