pub mod config;
pub mod error;
pub mod graph;
pub mod trace;
pub mod traits;

pub use config::{
    ConfigManager, DatabaseBackend, DatabaseConfig, LoggingConfig, Settings, SurrealDbConfig,
    SyncConfig,
};
pub use error::*;
pub use graph::*;
pub use trace::*;
pub use traits::*;
