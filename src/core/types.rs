// Core Type Definitions for Market Oracle
// Candles, signals, verdicts, and prediction records shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// Candle bucket size for a stored series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    H1,
    H4,
    D1,
}

impl Granularity {
    /// Wire name used by the market-data API
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::H1 => "1h",
            Granularity::H4 => "4h",
            Granularity::D1 => "1d",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Granularity::H1 => 3_600_000,
            Granularity::H4 => 14_400_000,
            Granularity::D1 => 86_400_000,
        }
    }

    pub fn all() -> [Granularity; 3] {
        [Granularity::H1, Granularity::H4, Granularity::D1]
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Forecast horizon for a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    H1,
    H4,
    H24,
}

impl Horizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::H1 => "1h",
            Horizon::H4 => "4h",
            Horizon::H24 => "24h",
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directional lean of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

// ============================================================================
// Candle
// ============================================================================

/// Single OHLCV bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// OHLC consistency: high covers the body, low covers the body, volume non-negative
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0.0
            && self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

// ============================================================================
// Pattern Signals
// ============================================================================

/// Qualitative pattern detected on an indicator frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PatternKind {
    Doji,
    BandBreakoutBullish,
    BandBreakoutBearish,
    RsiOverbought,
    RsiOversold,
    VolumeSpike,
    BuyingPressure,
    SellingPressure,
    Absorption,
    FairValueGapBullish { top: f64, bottom: f64 },
    FairValueGapBearish { top: f64, bottom: f64 },
}

impl PatternKind {
    /// Human-readable label shown to presentation collaborators
    pub fn label(&self) -> String {
        match self {
            PatternKind::Doji => "Doji - Indecision".to_string(),
            PatternKind::BandBreakoutBullish => "Bollinger Band Breakout - Bullish".to_string(),
            PatternKind::BandBreakoutBearish => "Bollinger Band Breakout - Bearish".to_string(),
            PatternKind::RsiOverbought => "RSI Overbought".to_string(),
            PatternKind::RsiOversold => "RSI Oversold".to_string(),
            PatternKind::VolumeSpike => "High Volume Spike".to_string(),
            PatternKind::BuyingPressure => "Strong buying pressure".to_string(),
            PatternKind::SellingPressure => "Strong selling pressure".to_string(),
            PatternKind::Absorption => {
                "Absorption (large volume, small price change)".to_string()
            }
            PatternKind::FairValueGapBullish { top, bottom } => {
                format!("Bullish FVG [{:.2} - {:.2}]", bottom, top)
            }
            PatternKind::FairValueGapBearish { top, bottom } => {
                format!("Bearish FVG [{:.2} - {:.2}]", bottom, top)
            }
        }
    }
}

/// A pattern attached to the frame index it fired at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub kind: PatternKind,
    pub index: usize,
}

impl fmt::Display for PatternSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.kind.label(), self.index)
    }
}

// ============================================================================
// Inference Verdict
// ============================================================================

/// Structured judgment from the inference service.
/// Every field is mandatory; the degraded fallback path fills all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceVerdict {
    pub technical_summary: String,
    pub price_action: String,
    pub entry_levels: String,
    pub exit_levels: String,
    pub risk_assessment: String,
    #[serde(deserialize_with = "de_confidence")]
    pub confidence: u8,
    pub bias: Bias,
}

/// The model frequently quotes the confidence integer ("75"); accept both forms.
fn de_confidence<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(c) if c.is_finite() => Ok(c.clamp(0.0, 100.0).round() as u8),
        _ => Err(D::Error::custom(format!("invalid confidence: {}", value))),
    }
}

// ============================================================================
// Predictions
// ============================================================================

/// Point forecast for one horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub horizon: Horizon,
    pub price: f64,
    pub change_pct: f64,
}

/// Forecasts for all three horizons plus model bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSet {
    pub h1: Prediction,
    pub h4: Prediction,
    pub h24: Prediction,
    pub accuracy: f64,
    pub factors: Vec<String>,
}

impl PredictionSet {
    pub fn for_horizon(&self, horizon: Horizon) -> &Prediction {
        match horizon {
            Horizon::H1 => &self.h1,
            Horizon::H4 => &self.h4,
            Horizon::H24 => &self.h24,
        }
    }
}

impl fmt::Display for PredictionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Predictions(1h={:.2} {:+.2}%, 4h={:.2} {:+.2}%, 24h={:.2} {:+.2}%, acc={:.0}%)",
            self.h1.price, self.h1.change_pct,
            self.h4.price, self.h4.change_pct,
            self.h24.price, self.h24.change_pct,
            self.accuracy
        )
    }
}

// ============================================================================
// Combined Analysis
// ============================================================================

/// The combined current-market analysis served to presentation collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub technical: String,
    pub price_action: String,
    pub levels: String,
    pub confidence: u8,
    pub patterns: Vec<String>,
    pub bias: Bias,
    pub generated_at_ms: i64,
}

/// Unit of persistence for computed results, keyed by kind and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub kind: String,
    pub timestamp_ms: i64,
    pub payload: serde_json::Value,
    pub confidence: u8,
}
