// Market Data Client - Pull-style OHLCV fetch
// Rate-limited HTTP client with retry/backoff for the public klines endpoint

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::config::MarketDataConfig;
use crate::core::types::{Candle, Granularity};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API status {0}")]
    Status(u16),
    #[error("malformed kline row: {0}")]
    Malformed(String),
    #[error("max retries exceeded")]
    MaxRetries,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket rate limiter for API requests.
/// Used behind Arc<Mutex<RateLimiter>>, so no internal lock needed.
pub struct RateLimiter {
    tokens: f64,
    pub max_tokens: f64,
    rate_per_sec: f64,
    last_update: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute as f64;
        Self {
            tokens: rpm,
            max_tokens: rpm,
            rate_per_sec: rpm / 60.0,
            last_update: now_secs(),
        }
    }

    /// Wait until a token is available (caller must hold the Mutex)
    pub async fn acquire(&mut self) {
        loop {
            self.add_tokens();

            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn add_tokens(&mut self) {
        let now = now_secs();
        let elapsed = now - self.last_update;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
        self.last_update = now;
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct MarketClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
}

impl fmt::Display for MarketClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarketClient(sent={}, ok={}, fail={}, retries={})",
            self.requests_sent, self.requests_succeeded, self.requests_failed, self.retries
        )
    }
}

// ============================================================================
// Market Data Client
// ============================================================================

/// HTTP client for public futures market data
///
/// Features:
/// - Token bucket rate limiting
/// - Automatic retries with exponential backoff
/// - Defensive parsing of string-encoded numeric rows
pub struct MarketDataClient {
    base_url: String,
    instrument: String,
    max_retries: u32,

    client: Client,
    limiter: Arc<Mutex<RateLimiter>>,

    requests_sent: Arc<Mutex<u64>>,
    requests_succeeded: Arc<Mutex<u64>>,
    requests_failed: Arc<Mutex<u64>>,
    retries: Arc<Mutex<u64>>,
}

impl MarketDataClient {
    pub fn new(
        base_url: &str,
        instrument: &str,
        requests_per_minute: u32,
        timeout_seconds: u64,
        max_retries: u32,
    ) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            instrument: instrument.to_uppercase(),
            max_retries,
            client,
            limiter: Arc::new(Mutex::new(RateLimiter::new(requests_per_minute))),
            requests_sent: Arc::new(Mutex::new(0)),
            requests_succeeded: Arc::new(Mutex::new(0)),
            requests_failed: Arc::new(Mutex::new(0)),
            retries: Arc::new(Mutex::new(0)),
        })
    }

    pub fn from_config(config: &MarketDataConfig) -> Result<Self, MarketDataError> {
        Self::new(
            &config.base_url,
            &config.instrument,
            config.requests_per_minute,
            config.request_timeout_seconds,
            config.max_retries,
        )
    }

    /// Fetch the most recent `limit` candles for one granularity
    pub async fn fetch_klines(
        &self,
        granularity: Granularity,
        limit: u32,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let params = [
            ("symbol", self.instrument.clone()),
            ("interval", granularity.as_str().to_string()),
            ("limit", limit.to_string()),
        ];

        let rows: Value = self.get_with_retries(&url, &params).await?;
        let rows = rows
            .as_array()
            .ok_or_else(|| MarketDataError::Malformed("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline_row(row)?);
        }
        Ok(candles)
    }

    /// Test connectivity
    pub async fn ping(&self) -> bool {
        let url = format!("{}/fapi/v1/ping", self.base_url);
        self.get_with_retries::<[(&str, String); 0]>(&url, &[]).await.is_ok()
    }

    async fn get_with_retries<P: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        params: &P,
    ) -> Result<Value, MarketDataError> {
        self.limiter.lock().await.acquire().await;

        for attempt in 0..=self.max_retries {
            *self.requests_sent.lock().await += 1;

            let result = self.client.get(url).query(params).send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::OK {
                        let data: Value = response.json().await?;
                        *self.requests_succeeded.lock().await += 1;
                        return Ok(data);
                    }

                    if attempt < self.max_retries {
                        let delay = 2u64.pow(attempt);
                        warn!(
                            attempt = attempt + 1,
                            status = status.as_u16(),
                            delay_secs = delay,
                            "Market data request failed, retrying"
                        );
                        *self.retries.lock().await += 1;
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }

                    *self.requests_failed.lock().await += 1;
                    return Err(MarketDataError::Status(status.as_u16()));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = 2u64.pow(attempt);
                        warn!(
                            attempt = attempt + 1,
                            error = %e,
                            delay_secs = delay,
                            "Network error, retrying"
                        );
                        *self.retries.lock().await += 1;
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }

                    *self.requests_failed.lock().await += 1;
                    return Err(MarketDataError::Http(e));
                }
            }
        }

        *self.requests_failed.lock().await += 1;
        Err(MarketDataError::MaxRetries)
    }

    pub async fn get_stats(&self) -> MarketClientStats {
        MarketClientStats {
            requests_sent: *self.requests_sent.lock().await,
            requests_succeeded: *self.requests_succeeded.lock().await,
            requests_failed: *self.requests_failed.lock().await,
            retries: *self.retries.lock().await,
        }
    }
}

/// Parse one kline row: [open_time_ms, "o", "h", "l", "c", "v", ...].
/// Numeric fields arrive string-encoded.
fn parse_kline_row(row: &Value) -> Result<Candle, MarketDataError> {
    let fields = row
        .as_array()
        .ok_or_else(|| MarketDataError::Malformed("kline row is not an array".into()))?;
    if fields.len() < 6 {
        return Err(MarketDataError::Malformed(format!(
            "kline row has {} fields, expected at least 6",
            fields.len()
        )));
    }

    let timestamp_ms = fields[0]
        .as_i64()
        .ok_or_else(|| MarketDataError::Malformed("missing open time".into()))?;

    Ok(Candle {
        timestamp_ms,
        open: numeric_field(&fields[1], "open")?,
        high: numeric_field(&fields[2], "high")?,
        low: numeric_field(&fields[3], "low")?,
        close: numeric_field(&fields[4], "close")?,
        volume: numeric_field(&fields[5], "volume")?,
    })
}

fn numeric_field(value: &Value, name: &str) -> Result<f64, MarketDataError> {
    let parsed = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| MarketDataError::Malformed(format!("bad {} field: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(1200);
        assert_eq!(limiter.max_tokens, 1200.0);
    }

    #[test]
    fn test_client_creation_from_config() {
        let config = MarketDataConfig::default();
        let client = MarketDataClient::from_config(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_parse_kline_row_string_numerics() {
        let row = json!([
            1700000000000i64,
            "95000.10", "95500.00", "94800.50", "95250.00", "1234.56",
            1700003599999i64, "117000000.0", 50000, "600.0", "57000000.0", "0"
        ]);
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.timestamp_ms, 1_700_000_000_000);
        assert_eq!(candle.open, 95000.10);
        assert_eq!(candle.close, 95250.00);
        assert_eq!(candle.volume, 1234.56);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_parse_kline_row_rejects_short_row() {
        let row = json!([1700000000000i64, "95000.10"]);
        assert!(parse_kline_row(&row).is_err());
    }

    #[test]
    fn test_parse_kline_row_rejects_garbage_field() {
        let row = json!([1700000000000i64, "95000.10", "high", "94800.50", "95250.00", "1.0"]);
        assert!(parse_kline_row(&row).is_err());
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let client = MarketDataClient::from_config(&MarketDataConfig::default()).unwrap();
        let stats = client.get_stats().await;
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.requests_failed, 0);
    }
}
