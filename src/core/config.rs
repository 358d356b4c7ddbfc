// Configuration Management for Market Oracle
// Sectioned JSON config with env overrides; constructed in main and passed
// explicitly into the components that need it

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub instrument: String,

    // Connection settings
    pub request_timeout_seconds: u64,
    pub requests_per_minute: u32,
    pub max_retries: u32,

    // How many candles each collection pass pulls per granularity
    pub collect_limit: u32,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            instrument: "BTCUSDT".to_string(),
            request_timeout_seconds: 10,
            requests_per_minute: 1200,
            max_retries: 3,
            collect_limit: 168,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub request_timeout_seconds: u64,

    // Circuit breaker
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,

    // Verdict cache freshness window
    pub verdict_ttl_seconds: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.1,
            request_timeout_seconds: 30,
            failure_threshold: 3,
            reset_timeout_seconds: 60,
            verdict_ttl_seconds: 600,
        }
    }
}

/// Thresholds for the pattern-detection rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternThresholds {
    pub doji_body_ratio: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub volume_spike_ratio: f64,
    pub orderflow_volume_ratio: f64,
    pub absorption_volume_ratio: f64,
    pub absorption_price_move_pct: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            doji_body_ratio: 0.1,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            volume_spike_ratio: 1.5,
            orderflow_volume_ratio: 1.2,
            absorption_volume_ratio: 1.5,
            absorption_price_move_pct: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    // Combined-analysis memo freshness window (independent of the verdict cache)
    pub analysis_ttl_seconds: u64,

    pub thresholds: PatternThresholds,

    // Retained candles per granularity buffer
    pub max_candles: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_ttl_seconds: 300,
            thresholds: PatternThresholds::default(),
            max_candles: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub collect_interval_seconds: u64,
    pub collect_backoff_seconds: u64,
    pub analysis_interval_seconds: u64,
    pub analysis_backoff_seconds: u64,
    pub retrain_interval_seconds: u64,
    pub retrain_backoff_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collect_interval_seconds: 300,
            collect_backoff_seconds: 60,
            analysis_interval_seconds: 3600,
            analysis_backoff_seconds: 300,
            retrain_interval_seconds: 21600,
            retrain_backoff_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    pub results_file: String,
    pub model_params_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            results_file: "analysis_results.jsonl".to_string(),
            model_params_file: "model_params.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_format: bool,
    pub console_output: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_format: false,
            console_output: true,
        }
    }
}

// ============================================================================
// Application Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketDataConfig,
    pub inference: InferenceConfig,
    pub analysis: AnalysisConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

impl AppConfig {
    /// Load configuration: defaults, then optional JSON file, then env overrides
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = config_path {
            config.load_from_file(path)?;
        }
        config.load_from_env();

        info!("Configuration initialized");
        Ok(config)
    }

    /// Merge sections from a JSON file; missing sections keep their defaults
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let sections: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(data) = sections.get("market") {
            if let Ok(market) = serde_json::from_value(data.clone()) {
                self.market = market;
            }
        }
        if let Some(data) = sections.get("inference") {
            if let Ok(inference) = serde_json::from_value(data.clone()) {
                self.inference = inference;
            }
        }
        if let Some(data) = sections.get("analysis") {
            if let Ok(analysis) = serde_json::from_value(data.clone()) {
                self.analysis = analysis;
            }
        }
        if let Some(data) = sections.get("scheduler") {
            if let Ok(scheduler) = serde_json::from_value(data.clone()) {
                self.scheduler = scheduler;
            }
        }
        if let Some(data) = sections.get("storage") {
            if let Ok(storage) = serde_json::from_value(data.clone()) {
                self.storage = storage;
            }
        }
        if let Some(data) = sections.get("monitoring") {
            if let Ok(monitoring) = serde_json::from_value(data.clone()) {
                self.monitoring = monitoring;
            }
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Environment overrides for deployment-specific endpoints
    pub fn load_from_env(&mut self) {
        if let Ok(endpoint) = std::env::var("ORACLE_INFERENCE_ENDPOINT") {
            self.inference.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("ORACLE_INFERENCE_MODEL") {
            self.inference.model = model;
        }
        if let Ok(base_url) = std::env::var("ORACLE_MARKET_BASE_URL") {
            self.market.base_url = base_url;
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration; logs each problem, returns false if any found
    pub fn validate(&self) -> bool {
        let mut errors = Vec::new();

        if self.market.instrument.is_empty() {
            errors.push("market.instrument must not be empty".to_string());
        }
        if self.inference.endpoint.is_empty() {
            errors.push("inference.endpoint must not be empty".to_string());
        }
        if self.inference.failure_threshold == 0 {
            errors.push("inference.failure_threshold must be at least 1".to_string());
        }
        if self.inference.request_timeout_seconds == 0 {
            errors.push("inference.request_timeout_seconds must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            errors.push("inference.temperature must be between 0 and 2".to_string());
        }
        if self.analysis.max_candles < 100 {
            errors.push("analysis.max_candles must be at least 100".to_string());
        }
        if self.scheduler.collect_backoff_seconds > self.scheduler.collect_interval_seconds {
            errors.push("collect backoff must not exceed the collect interval".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return false;
        }

        info!("Configuration validated successfully");
        true
    }
}
