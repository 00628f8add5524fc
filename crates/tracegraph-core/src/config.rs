use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SurrealDbConfig {
    /// Connection string for SurrealDB (e.g., "mem://", "surrealkv://data/graph" or "ws://localhost:8000")
    pub connection: String,
    /// Namespace for multi-tenancy
    #[serde(default = "SurrealDbConfig::default_namespace")]
    pub namespace: String,
    /// Database name
    #[serde(default = "SurrealDbConfig::default_database")]
    pub database: String,
    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password for authentication
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub password: Option<SecretString>,
}

impl SurrealDbConfig {
    fn default_namespace() -> String {
        "tracegraph".to_string()
    }

    fn default_database() -> String {
        "dependencies".to_string()
    }

    /// In-process store, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            connection: "mem://".into(),
            ..Self::default()
        }
    }
}

impl Default for SurrealDbConfig {
    fn default() -> Self {
        Self {
            connection: "ws://localhost:8000".into(),
            namespace: Self::default_namespace(),
            database: Self::default_database(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    #[default]
    Memory,
    SurrealDb,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default)]
    pub surrealdb: SurrealDbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncConfig {
    /// Upper bound for a single store call, in seconds
    #[serde(default = "SyncConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SyncConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.sync.timeout_secs > 0, "sync.timeout_secs must be > 0");
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level cannot be empty"
        );

        if self.database.backend == DatabaseBackend::SurrealDb {
            anyhow::ensure!(
                !self.database.surrealdb.connection.is_empty(),
                "database.surrealdb.connection cannot be empty"
            );
            anyhow::ensure!(
                !self.database.surrealdb.namespace.is_empty(),
                "database.surrealdb.namespace cannot be empty"
            );
            anyhow::ensure!(
                !self.database.surrealdb.database.is_empty(),
                "database.surrealdb.database cannot be empty"
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager;

impl ConfigManager {
    /// Load and validate settings for `env_override` (or `APP_ENV`) from
    /// `config_dir` (or the default directory).
    pub fn load(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Settings> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let config_dir = Self::get_config_dir(config_dir);
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the default configuration directory.
    ///
    /// `TRACEGRAPH_CONFIG_DIR` wins, then `./config/`, then the current directory.
    pub fn default_config_dir() -> PathBuf {
        if let Ok(dir) = env::var("TRACEGRAPH_CONFIG_DIR") {
            if !dir.trim().is_empty() {
                return PathBuf::from(dir);
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn get_config_dir(custom_path: Option<PathBuf>) -> PathBuf {
        custom_path.unwrap_or_else(Self::default_config_dir)
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yaml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.json")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.yaml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.yml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.json", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("TRACEGRAPH").separator("__"));

        let settings: Settings = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}
