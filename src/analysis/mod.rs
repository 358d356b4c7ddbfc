// Analysis Module - Indicator math, pattern rules, inference, and blending

pub mod engine;
pub mod indicators;
pub mod inference;
pub mod model;
pub mod patterns;
pub mod prediction;

use thiserror::Error;

use crate::store::series::SeriesError;

/// Pipeline-level failure surfaced to callers. Inference-side failures never
/// appear here; they are absorbed into degraded verdicts inside the client.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },
}

impl From<SeriesError> for AnalysisError {
    fn from(e: SeriesError) -> Self {
        match e {
            SeriesError::InsufficientData { required, available } => {
                AnalysisError::InsufficientData { required, available }
            }
        }
    }
}

// Re-export commonly used items
pub use engine::{AnalysisEngine, EngineStats};
pub use indicators::{compute_indicators, IndicatorFrame};
pub use inference::{BreakerState, CircuitBreaker, InferenceClient, InferenceError};
pub use model::{ModelParams, ModelState};
pub use patterns::PatternDetector;
pub use prediction::PredictionBlender;
