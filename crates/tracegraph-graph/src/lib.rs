pub mod aggregator;
pub mod anti_patterns;
pub mod coupling;
pub mod endpoint_usage;
pub mod normalizer;
pub mod pipeline;
pub mod storage;
pub mod sync_cursor;
pub mod traversal;

#[cfg(feature = "surrealdb")]
pub mod surrealdb_storage;

pub use aggregator::*;
pub use anti_patterns::*;
pub use coupling::*;
pub use endpoint_usage::*;
pub use normalizer::*;
pub use pipeline::*;
pub use storage::*;
pub use sync_cursor::*;
pub use traversal::*;

#[cfg(feature = "surrealdb")]
pub use surrealdb_storage::*;
