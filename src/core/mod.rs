// Core Module - Foundational types, config, and logging

pub mod config;
pub mod logger;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{
    AnalysisConfig, AppConfig, ConfigError, InferenceConfig, MarketDataConfig,
    MonitoringConfig, PatternThresholds, SchedulerConfig, StorageConfig,
};
pub use logger::setup_logging;
pub use types::*;
