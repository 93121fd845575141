//! Content-addressed result cache.

pub mod schema;
pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteCache;
pub use traits::{CacheStats, CachedDocument, CachedField, ResultCache};
