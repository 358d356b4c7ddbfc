// Model State - Backtested hit-rate bookkeeping for the prediction blender
// The periodic retraining task replays the contrarian RSI rule over recent
// history and records how often the next close agreed with it.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analysis::indicators::IndicatorFrame;

/// Hit rate assumed before the first backtest has run
const DEFAULT_ACCURACY: f64 = 72.0;
/// Accuracy reported when the backtest window held no extreme-RSI signals
const NO_SIGNAL_ACCURACY: f64 = 50.0;
/// How many trailing periods the backtest replays
pub const BACKTEST_WINDOW: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub last_accuracy: f64,
    pub last_update: String,
    pub model_version: String,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            last_accuracy: DEFAULT_ACCURACY,
            last_update: String::new(),
            model_version: "1.0".to_string(),
        }
    }
}

/// Owns the persisted model parameters; shared read access for the blender,
/// exclusive writes from the retraining task.
pub struct ModelState {
    params: RwLock<ModelParams>,
    path: PathBuf,
}

impl ModelState {
    /// Open model state, restoring persisted parameters when present
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let params = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ModelParams>(&content) {
                Ok(params) => {
                    info!(accuracy = params.last_accuracy, "Restored model parameters");
                    params
                }
                Err(e) => {
                    warn!(error = %e, "Unreadable model parameters, using defaults");
                    ModelParams::default()
                }
            },
            Err(_) => ModelParams::default(),
        };

        Self {
            params: RwLock::new(params),
            path,
        }
    }

    pub fn accuracy(&self) -> f64 {
        self.params.read().last_accuracy
    }

    pub fn params(&self) -> ModelParams {
        self.params.read().clone()
    }

    /// Replay the direction rule over the frame, record the outcome, and
    /// persist the updated parameters
    pub fn retrain(&self, frame: &IndicatorFrame) -> f64 {
        let accuracy =
            backtest_direction_accuracy(frame, BACKTEST_WINDOW).unwrap_or(NO_SIGNAL_ACCURACY);

        {
            let mut params = self.params.write();
            params.last_accuracy = accuracy;
            params.last_update = Utc::now().to_rfc3339();
        }
        self.save();

        info!(accuracy = accuracy, "Model retraining completed");
        accuracy
    }

    fn save(&self) {
        let params = self.params.read().clone();
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(error = %e, "Could not create model parameter directory");
                return;
            }
        }
        match serde_json::to_string_pretty(&params) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(error = %e, "Could not persist model parameters");
                }
            }
            Err(e) => warn!(error = %e, "Could not serialize model parameters"),
        }
    }
}

/// Hit rate of the contrarian RSI rule over the last `window` periods:
/// oversold predicts the next close up, overbought predicts it down.
/// None when the window held no extreme readings to score.
pub fn backtest_direction_accuracy(frame: &IndicatorFrame, window: usize) -> Option<f64> {
    let len = frame.len();
    if len < 2 {
        return None;
    }

    let start = len.saturating_sub(window + 1);
    let mut hits = 0u32;
    let mut total = 0u32;

    for i in start..len - 1 {
        let Some(rsi) = frame.rsi_14[i] else { continue };

        let predicted_up = if rsi < 30.0 {
            true
        } else if rsi > 70.0 {
            false
        } else {
            continue;
        };

        let actual_up = frame.candles[i + 1].close > frame.candles[i].close;
        if predicted_up == actual_up {
            hits += 1;
        }
        total += 1;
    }

    if total == 0 {
        return None;
    }
    Some(hits as f64 / total as f64 * 100.0)
}
