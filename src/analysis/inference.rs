// Resilient Inference Client - Circuit-broken, cached LLM judgment call
// One external call per analysis cycle. Every failure mode (short-circuit,
// timeout, HTTP error, malformed response) degrades to a deterministic
// verdict built from the indicator frame; callers never see the raw error.

use parking_lot::{Mutex, RwLock};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::analysis::indicators::IndicatorFrame;
use crate::core::config::InferenceConfig;
use crate::core::types::{Bias, InferenceVerdict, PatternSignal};
use crate::store::cache::AnalysisCache;

/// Confidence reported on the degraded path
const FALLBACK_CONFIDENCE: u8 = 50;

// ============================================================================
// Error Types (internal to the client; absorbed before reaching callers)
// ============================================================================

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("inference request timed out")]
    Timeout,
    #[error("inference HTTP status {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Three-state breaker over consecutive call failures.
/// Closed passes calls through; `failure_threshold` consecutive failures open
/// it. Open short-circuits until `reset_timeout` elapses, then exactly one
/// trial call is admitted (Half-Open); its outcome resolves the state.
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_threshold,
            reset_timeout,
            consecutive_failures: 0,
            opened_at: None,
            trips: 0,
        }
    }

    /// Gate a call attempt. Err(CircuitOpen) means no network attempt may be
    /// made. An Open breaker past its reset timeout admits the caller as the
    /// Half-Open trial; further callers are rejected until the trial resolves.
    pub fn try_acquire(&mut self) -> Result<(), InferenceError> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen;
                    debug!("Circuit breaker half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(InferenceError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => Err(InferenceError::CircuitOpen),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.state = BreakerState::Closed;
    }

    pub fn record_failure(&mut self) {
        match self.state {
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.trips += 1;
        warn!(
            consecutive_failures = self.consecutive_failures,
            "Circuit breaker opened"
        );
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub calls_attempted: u64,
    pub cache_hits: u64,
    pub fallbacks_served: u64,
    pub breaker_trips: u64,
    pub breaker_state: BreakerState,
}

impl fmt::Display for InferenceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Inference(calls={}, cache_hits={}, fallbacks={}, trips={}, breaker={})",
            self.calls_attempted, self.cache_hits, self.fallbacks_served,
            self.breaker_trips, self.breaker_state
        )
    }
}

// ============================================================================
// Inference Client
// ============================================================================

/// Wraps the external judgment call with a request timeout, the circuit
/// breaker, and a prompt-keyed verdict cache.
pub struct InferenceClient {
    endpoint: String,
    model: String,
    temperature: f64,

    client: Client,
    breaker: Mutex<CircuitBreaker>,
    cache: Arc<AnalysisCache>,
    verdict_ttl: Duration,

    calls_attempted: RwLock<u64>,
    cache_hits: RwLock<u64>,
    fallbacks_served: RwLock<u64>,
}

impl InferenceClient {
    pub fn from_config(
        config: &InferenceConfig,
        cache: Arc<AnalysisCache>,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
            breaker: Mutex::new(CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.reset_timeout_seconds),
            )),
            cache,
            verdict_ttl: Duration::from_secs(config.verdict_ttl_seconds),
            calls_attempted: RwLock::new(0),
            cache_hits: RwLock::new(0),
            fallbacks_served: RwLock::new(0),
        })
    }

    /// Best-effort judgment for the current frame. Serves the cached verdict
    /// when fresh; otherwise calls out and, on any failure, returns the
    /// degraded verdict. Never errors.
    pub async fn judge(
        &self,
        frame: &IndicatorFrame,
        patterns: &[PatternSignal],
    ) -> InferenceVerdict {
        let prompt = self.render_prompt(frame, patterns);
        let key = cache_key(&prompt);

        if let Some(value) = self.cache.get(&key) {
            if let Ok(verdict) = serde_json::from_value::<InferenceVerdict>(value) {
                *self.cache_hits.write() += 1;
                debug!("Serving cached inference verdict");
                return verdict;
            }
        }

        match self.call(&prompt).await {
            Ok(verdict) => {
                if let Ok(value) = serde_json::to_value(&verdict) {
                    self.cache.set(&key, value, self.verdict_ttl);
                }
                verdict
            }
            Err(e) => {
                warn!(error = %e, "Inference unavailable, serving degraded verdict");
                *self.fallbacks_served.write() += 1;
                fallback_verdict(frame)
            }
        }
    }

    async fn call(&self, prompt: &str) -> Result<InferenceVerdict, InferenceError> {
        self.breaker.lock().try_acquire()?;
        *self.calls_attempted.write() += 1;

        // Availability failures (refused, timeout, non-200) feed the breaker;
        // a 200 with an unparseable body does not.
        let response = match self.send(prompt).await {
            Ok(response) => {
                self.breaker.lock().record_success();
                response
            }
            Err(e) => {
                self.breaker.lock().record_failure();
                return Err(e);
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        let raw = payload
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| InferenceError::Malformed("missing response field".to_string()))?;

        extract_verdict(raw)
    }

    async fn send(&self, prompt: &str) -> Result<reqwest::Response, InferenceError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Transport(e)
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(InferenceError::Http(status.as_u16()));
        }
        Ok(response)
    }

    fn render_prompt(&self, frame: &IndicatorFrame, patterns: &[PatternSignal]) -> String {
        let i = frame.latest_index();
        let latest = frame.latest();

        let pattern_list = if patterns.is_empty() {
            "none".to_string()
        } else {
            patterns
                .iter()
                .map(|s| s.kind.label())
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "You are an expert cryptocurrency trader analyzing BTCUSDT.\n\
             \n\
             Current Market Data:\n\
             - Price: ${:.2}\n\
             - 24h Change: {}%\n\
             - RSI: {}\n\
             - MACD: {}\n\
             - Volume: {:.0}\n\
             \n\
             Detected Patterns: {}\n\
             \n\
             Technical Levels:\n\
             - Resistance (R1): ${:.2}\n\
             - Support (S1): ${:.2}\n\
             - Bollinger Upper: {}\n\
             - Bollinger Lower: {}\n\
             \n\
             Provide analysis in this JSON format:\n\
             {{\n\
                 \"technical_summary\": \"Brief technical analysis\",\n\
                 \"price_action\": \"Current price action description\",\n\
                 \"entry_levels\": \"Suggested entry levels\",\n\
                 \"exit_levels\": \"Suggested exit levels\",\n\
                 \"risk_assessment\": \"Risk analysis\",\n\
                 \"confidence\": \"Confidence level 1-100\",\n\
                 \"bias\": \"bullish/bearish/neutral\"\n\
             }}",
            latest.close,
            fmt_opt(frame.change_pct_over(24), 2),
            fmt_opt(frame.rsi_14[i], 1),
            fmt_opt(frame.macd[i], 4),
            latest.volume,
            pattern_list,
            frame.r1[i],
            frame.s1[i],
            fmt_opt(frame.bb_upper[i], 2),
            fmt_opt(frame.bb_lower[i], 2),
        )
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().state()
    }

    pub fn get_stats(&self) -> InferenceStats {
        let breaker = self.breaker.lock();
        InferenceStats {
            calls_attempted: *self.calls_attempted.read(),
            cache_hits: *self.cache_hits.read(),
            fallbacks_served: *self.fallbacks_served.read(),
            breaker_trips: breaker.trips(),
            breaker_state: breaker.state(),
        }
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "n/a".to_string(),
    }
}

/// Deterministic cache key from a stable hash of the rendered prompt
fn cache_key(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    format!("llm:{}", hex::encode(digest))
}

/// Pull the JSON object substring (first '{' to last '}') out of the raw
/// model text and parse it
fn extract_verdict(raw: &str) -> Result<InferenceVerdict, InferenceError> {
    let start = raw
        .find('{')
        .ok_or_else(|| InferenceError::Malformed("no JSON object in response".to_string()))?;
    let end = raw
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| InferenceError::Malformed("no JSON object in response".to_string()))?;

    serde_json::from_str(&raw[start..=end]).map_err(|e| InferenceError::Malformed(e.to_string()))
}

/// Deterministic stand-in verdict built from the frame's own levels
pub fn fallback_verdict(frame: &IndicatorFrame) -> InferenceVerdict {
    let i = frame.latest_index();
    InferenceVerdict {
        technical_summary: "Technical analysis temporarily unavailable".to_string(),
        price_action: "Price action analysis pending".to_string(),
        entry_levels: format!("Watch ${:.2} support", frame.s1[i]),
        exit_levels: format!("Target ${:.2} resistance", frame.r1[i]),
        risk_assessment: "Moderate risk".to_string(),
        confidence: FALLBACK_CONFIDENCE,
        bias: Bias::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indicators::compute_indicators;
    use crate::core::types::Candle;

    fn make_frame() -> IndicatorFrame {
        let candles: Vec<Candle> = (0..30)
            .map(|i| Candle {
                timestamp_ms: i as i64 * 3_600_000,
                open: 100.0,
                high: 102.0,
                low: 98.0,
                close: 101.0,
                volume: 10.0,
            })
            .collect();
        compute_indicators(&candles).unwrap()
    }

    fn unreachable_client(cache: Arc<AnalysisCache>) -> InferenceClient {
        let config = InferenceConfig {
            endpoint: "http://127.0.0.1:1/api/generate".to_string(),
            request_timeout_seconds: 2,
            ..InferenceConfig::default()
        };
        InferenceClient::from_config(&config, cache).unwrap()
    }

    // ------------------------------------------------------------------
    // Circuit breaker state machine
    // ------------------------------------------------------------------

    #[test]
    fn test_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Short-circuits with no network attempt
        assert!(matches!(
            breaker.try_acquire(),
            Err(InferenceError::CircuitOpen)
        ));
    }

    #[test]
    fn test_breaker_success_resets_counter() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_half_open_single_trial() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(40));

        // Exactly one trial admitted
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(matches!(
            breaker.try_acquire(),
            Err(InferenceError::CircuitOpen)
        ));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.trips(), 2);
        // Reset timer restarted
        assert!(breaker.try_acquire().is_err());
    }

    // ------------------------------------------------------------------
    // Response parsing and fallback
    // ------------------------------------------------------------------

    #[test]
    fn test_extract_verdict_from_noisy_text() {
        let raw = r#"Sure! Here is my analysis:
        {
            "technical_summary": "Consolidating",
            "price_action": "Rangebound",
            "entry_levels": "99.50",
            "exit_levels": "103.00",
            "risk_assessment": "Low",
            "confidence": "80",
            "bias": "bullish"
        }
        Let me know if you need anything else."#;

        let verdict = extract_verdict(raw).unwrap();
        assert_eq!(verdict.confidence, 80);
        assert_eq!(verdict.bias, Bias::Bullish);
    }

    #[test]
    fn test_extract_verdict_rejects_missing_json() {
        assert!(extract_verdict("no json here at all").is_err());
        assert!(extract_verdict("{ truncated").is_err());
        assert!(extract_verdict("{\"bias\": \"sideways\"}").is_err());
    }

    #[test]
    fn test_fallback_verdict_is_conservative() {
        let frame = make_frame();
        let verdict = fallback_verdict(&frame);

        assert_eq!(verdict.bias, Bias::Neutral);
        assert_eq!(verdict.confidence, FALLBACK_CONFIDENCE);

        let i = frame.latest_index();
        assert!(verdict.entry_levels.contains(&format!("{:.2}", frame.s1[i])));
        assert!(verdict.exit_levels.contains(&format!("{:.2}", frame.r1[i])));
    }

    #[test]
    fn test_cache_key_stable_and_distinct() {
        let a = cache_key("prompt one");
        let b = cache_key("prompt one");
        let c = cache_key("prompt two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("llm:"));
    }

    // ------------------------------------------------------------------
    // Client behavior without a reachable endpoint
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_judge_serves_cached_verdict_without_network() {
        let cache = Arc::new(AnalysisCache::new());
        let client = unreachable_client(cache.clone());
        let frame = make_frame();

        let cached = InferenceVerdict {
            technical_summary: "cached".to_string(),
            price_action: "cached".to_string(),
            entry_levels: "cached".to_string(),
            exit_levels: "cached".to_string(),
            risk_assessment: "cached".to_string(),
            confidence: 88,
            bias: Bias::Bearish,
        };
        let prompt = client.render_prompt(&frame, &[]);
        cache.set(
            &cache_key(&prompt),
            serde_json::to_value(&cached).unwrap(),
            Duration::from_secs(60),
        );

        let verdict = client.judge(&frame, &[]).await;
        assert_eq!(verdict.confidence, 88);
        assert_eq!(verdict.bias, Bias::Bearish);

        let stats = client.get_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.calls_attempted, 0);
    }

    #[tokio::test]
    async fn test_judge_degrades_on_unreachable_endpoint() {
        let cache = Arc::new(AnalysisCache::new());
        let client = unreachable_client(cache);
        let frame = make_frame();

        let verdict = client.judge(&frame, &[]).await;
        assert_eq!(verdict.bias, Bias::Neutral);
        assert_eq!(verdict.confidence, FALLBACK_CONFIDENCE);

        let stats = client.get_stats();
        assert_eq!(stats.fallbacks_served, 1);
    }

    #[tokio::test]
    async fn test_failures_are_never_cached() {
        let cache = Arc::new(AnalysisCache::new());
        let client = unreachable_client(cache.clone());
        let frame = make_frame();

        client.judge(&frame, &[]).await;
        assert!(cache.is_empty());
    }
}
