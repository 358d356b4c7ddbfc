// Market Module - External market-data access

pub mod client;
pub mod collector;

// Re-export commonly used items
pub use client::{MarketClientStats, MarketDataClient, MarketDataError, RateLimiter};
pub use collector::DataCollector;
