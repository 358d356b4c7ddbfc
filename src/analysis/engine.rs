// Analysis Engine - Top-level entry points for the analysis cycle
// Wires series -> indicators -> patterns -> {inference, blender}, memoizes the
// combined result, and persists what it computes. Inference failures degrade
// inside the client; only missing history surfaces as an error.

use chrono::Utc;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analysis::indicators::{compute_indicators, IndicatorFrame};
use crate::analysis::inference::InferenceClient;
use crate::analysis::model::ModelState;
use crate::analysis::patterns::PatternDetector;
use crate::analysis::prediction::PredictionBlender;
use crate::analysis::AnalysisError;
use crate::core::config::AppConfig;
use crate::core::types::{AnalysisRecord, Granularity, MarketAnalysis, PredictionSet};
use crate::store::cache::AnalysisCache;
use crate::store::persistence::AnalysisStore;
use crate::store::series::SeriesStore;

/// Cache key for the memoized combined analysis
const ANALYSIS_CACHE_KEY: &str = "analysis:current";

/// Minimum 1h history for the combined analysis (enough for the RSI column)
const MIN_ANALYSIS_CANDLES: usize = 15;
/// Minimum 1h history for predictions (enough for the MACD signal column)
const MIN_PREDICTION_CANDLES_1H: usize = 34;
const MIN_PREDICTION_CANDLES_4H: usize = 7;
const MIN_PREDICTION_CANDLES_1D: usize = 8;
/// Minimum 1h history before a retraining pass is worth scoring
const MIN_RETRAIN_CANDLES: usize = 50;

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub analyses_computed: u64,
    pub analyses_from_cache: u64,
    pub predictions_computed: u64,
    pub retrains_completed: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Engine(analyses={}, cached={}, predictions={}, retrains={})",
            self.analyses_computed, self.analyses_from_cache,
            self.predictions_computed, self.retrains_completed
        )
    }
}

pub struct AnalysisEngine {
    series: Arc<SeriesStore>,
    cache: Arc<AnalysisCache>,
    inference: Arc<InferenceClient>,
    detector: PatternDetector,
    blender: PredictionBlender,
    model: Arc<ModelState>,
    results: Arc<dyn AnalysisStore>,
    analysis_ttl: Duration,

    analyses_computed: RwLock<u64>,
    analyses_from_cache: RwLock<u64>,
    predictions_computed: RwLock<u64>,
    retrains_completed: RwLock<u64>,
}

impl AnalysisEngine {
    pub fn new(
        config: &AppConfig,
        series: Arc<SeriesStore>,
        cache: Arc<AnalysisCache>,
        inference: Arc<InferenceClient>,
        model: Arc<ModelState>,
        results: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            series,
            cache,
            inference,
            detector: PatternDetector::new(config.analysis.thresholds.clone()),
            blender: PredictionBlender::new(),
            model,
            results,
            analysis_ttl: Duration::from_secs(config.analysis.analysis_ttl_seconds),
            analyses_computed: RwLock::new(0),
            analyses_from_cache: RwLock::new(0),
            predictions_computed: RwLock::new(0),
            retrains_completed: RwLock::new(0),
        }
    }

    /// The combined current-market analysis, served from cache inside its
    /// freshness window. Errors only when history is missing; a dead or
    /// babbling inference endpoint shows up as a low-confidence neutral
    /// result instead.
    pub async fn current_analysis(&self) -> Result<MarketAnalysis, AnalysisError> {
        if let Some(value) = self.cache.get(ANALYSIS_CACHE_KEY) {
            if let Ok(analysis) = serde_json::from_value::<MarketAnalysis>(value) {
                *self.analyses_from_cache.write() += 1;
                debug!("Serving cached analysis");
                return Ok(analysis);
            }
        }

        let candles = self
            .series
            .window(Granularity::H1, 100, MIN_ANALYSIS_CANDLES)?;
        let frame = compute_indicators(&candles)?;
        let patterns = self.detector.detect(&frame)?;
        let verdict = self.inference.judge(&frame, &patterns).await;

        let analysis = MarketAnalysis {
            technical: verdict.technical_summary,
            price_action: verdict.price_action,
            levels: format!("Entry: {}\nExit: {}", verdict.entry_levels, verdict.exit_levels),
            confidence: verdict.confidence,
            patterns: patterns.iter().map(|s| s.kind.label()).collect(),
            bias: verdict.bias,
            generated_at_ms: Utc::now().timestamp_millis(),
        };

        if let Ok(value) = serde_json::to_value(&analysis) {
            self.cache.set(ANALYSIS_CACHE_KEY, value, self.analysis_ttl);
        }
        self.persist("analysis", &analysis, analysis.confidence);

        *self.analyses_computed.write() += 1;
        info!(bias = %analysis.bias, confidence = analysis.confidence, "Analysis computed");
        Ok(analysis)
    }

    /// Multi-horizon point forecasts from the three source granularities
    pub async fn price_predictions(&self) -> Result<PredictionSet, AnalysisError> {
        let frame_1h = compute_indicators(&self.series.window(
            Granularity::H1,
            168,
            MIN_PREDICTION_CANDLES_1H,
        )?)?;
        let frame_4h = compute_indicators(&self.series.window(
            Granularity::H4,
            168,
            MIN_PREDICTION_CANDLES_4H,
        )?)?;
        let frame_1d = compute_indicators(&self.series.window(
            Granularity::D1,
            100,
            MIN_PREDICTION_CANDLES_1D,
        )?)?;

        let current_price = frame_1h.latest().close;
        let set = self.blender.blend(
            &frame_1h,
            &frame_4h,
            &frame_1d,
            current_price,
            self.model.accuracy(),
        )?;

        let confidence = set.accuracy.clamp(0.0, 100.0).round() as u8;
        self.persist("prediction", &set, confidence);

        *self.predictions_computed.write() += 1;
        info!(%set, "Predictions computed");
        Ok(set)
    }

    /// Re-score the direction rule over extended history and persist the
    /// updated model parameters
    pub async fn retrain(&self) -> Result<f64, AnalysisError> {
        let candles = self
            .series
            .window(Granularity::H1, 1000, MIN_RETRAIN_CANDLES)?;
        let frame = compute_indicators(&candles)?;

        let accuracy = self.model.retrain(&frame);
        self.persist("model_accuracy", &self.model.params(), accuracy.round() as u8);

        *self.retrains_completed.write() += 1;
        Ok(accuracy)
    }

    fn persist<T: serde::Serialize>(&self, kind: &str, payload: &T, confidence: u8) {
        let record = match serde_json::to_value(payload) {
            Ok(payload) => AnalysisRecord {
                kind: kind.to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
                payload,
                confidence,
            },
            Err(e) => {
                warn!(kind = kind, error = %e, "Could not serialize result for storage");
                return;
            }
        };

        // Storage trouble must not fail the analysis cycle
        if let Err(e) = self.results.store(&record) {
            warn!(kind = kind, error = %e, "Could not persist result");
        }
    }

    /// Latest frame for presentation collaborators (chart rendering)
    pub fn indicator_frame(
        &self,
        granularity: Granularity,
        count: usize,
    ) -> Result<IndicatorFrame, AnalysisError> {
        let candles = self.series.window(granularity, count, MIN_ANALYSIS_CANDLES)?;
        compute_indicators(&candles)
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            analyses_computed: *self.analyses_computed.read(),
            analyses_from_cache: *self.analyses_from_cache.read(),
            predictions_computed: *self.predictions_computed.read(),
            retrains_completed: *self.retrains_completed.read(),
        }
    }
}
