// Store Module - Series buffers, TTL cache, and durable result storage

pub mod cache;
pub mod persistence;
pub mod series;

// Re-export commonly used items
pub use cache::{AnalysisCache, CacheStats};
pub use persistence::{AnalysisStore, JsonFileStore, StoreError};
pub use series::{SeriesError, SeriesStore, SeriesStoreStats};
