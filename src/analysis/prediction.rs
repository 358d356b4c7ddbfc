// Prediction Blender - Multi-horizon point forecasts
// Fuses momentum, oscillator, and trend factors into 1h/4h/24h forecasts.
// Longer horizons trust momentum more; every division is guarded so the
// output never carries NaN.

use crate::analysis::indicators::IndicatorFrame;
use crate::analysis::AnalysisError;
use crate::core::types::{Horizon, Prediction, PredictionSet};

/// Momentum lookbacks per source frame: 12 hourly, 6 four-hourly, 7 daily
const MOMENTUM_LOOKBACK_1H: usize = 12;
const MOMENTUM_LOOKBACK_4H: usize = 6;
const MOMENTUM_LOOKBACK_1D: usize = 7;

/// (momentum, rsi, macd) weight triples per horizon
const WEIGHTS_1H: (f64, f64, f64) = (0.3, 0.1, 0.1);
const WEIGHTS_4H: (f64, f64, f64) = (0.5, 0.2, 0.2);
const WEIGHTS_24H: (f64, f64, f64) = (0.7, 0.3, 0.3);

pub struct PredictionBlender;

impl PredictionBlender {
    pub fn new() -> Self {
        Self
    }

    /// Blend the three source frames into a full prediction set.
    /// `accuracy` is the most recent backtested hit rate, reported verbatim.
    pub fn blend(
        &self,
        frame_1h: &IndicatorFrame,
        frame_4h: &IndicatorFrame,
        frame_1d: &IndicatorFrame,
        current_price: f64,
        accuracy: f64,
    ) -> Result<PredictionSet, AnalysisError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(AnalysisError::InsufficientData {
                required: 1,
                available: 0,
            });
        }

        let momentum_1h = momentum(frame_1h, MOMENTUM_LOOKBACK_1H)?;
        let momentum_4h = momentum(frame_4h, MOMENTUM_LOOKBACK_4H)?;
        let momentum_1d = momentum(frame_1d, MOMENTUM_LOOKBACK_1D)?;

        // Oscillator and trend factors come from the hourly frame
        let i = frame_1h.latest_index();
        let rsi = frame_1h.rsi_14[i].ok_or(AnalysisError::InsufficientData {
            required: 15,
            available: frame_1h.len(),
        })?;
        let (macd, macd_signal) = match (frame_1h.macd[i], frame_1h.macd_signal[i]) {
            (Some(m), Some(s)) => (m, s),
            _ => {
                return Err(AnalysisError::InsufficientData {
                    required: 34,
                    available: frame_1h.len(),
                })
            }
        };

        // Contrarian oscillator pull: oversold pushes the forecast up
        let rsi_factor = (50.0 - rsi) / 100.0;
        // Bounded trend adjustment
        let macd_factor = (1000.0 * (macd - macd_signal)).tanh() * 0.02;

        let h1 = project(Horizon::H1, current_price, momentum_1h, rsi_factor, macd_factor, WEIGHTS_1H);
        let h4 = project(Horizon::H4, current_price, momentum_4h, rsi_factor, macd_factor, WEIGHTS_4H);
        let h24 = project(Horizon::H24, current_price, momentum_1d, rsi_factor, macd_factor, WEIGHTS_24H);

        Ok(PredictionSet {
            h1,
            h4,
            h24,
            accuracy,
            factors: vec![
                "RSI".to_string(),
                "MACD".to_string(),
                "Momentum".to_string(),
                "Volume".to_string(),
            ],
        })
    }
}

impl Default for PredictionBlender {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative close change over the trailing `lookback` candles
fn momentum(frame: &IndicatorFrame, lookback: usize) -> Result<f64, AnalysisError> {
    let len = frame.len();
    if len <= lookback {
        return Err(AnalysisError::InsufficientData {
            required: lookback + 1,
            available: len,
        });
    }

    let latest = frame.candles[len - 1].close;
    let past = frame.candles[len - 1 - lookback].close;
    if !past.is_finite() || past.abs() <= f64::EPSILON {
        return Err(AnalysisError::InsufficientData {
            required: lookback + 1,
            available: len,
        });
    }

    Ok((latest - past) / past)
}

fn project(
    horizon: Horizon,
    current_price: f64,
    momentum: f64,
    rsi_factor: f64,
    macd_factor: f64,
    weights: (f64, f64, f64),
) -> Prediction {
    let (w_mom, w_rsi, w_macd) = weights;
    let price =
        current_price * (1.0 + w_mom * momentum + w_rsi * rsi_factor + w_macd * macd_factor);
    let change_pct = (price - current_price) / current_price * 100.0;

    Prediction { horizon, price, change_pct }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indicators::compute_indicators;
    use crate::core::types::Candle;

    fn flat_frame(n: usize) -> IndicatorFrame {
        let candles: Vec<Candle> = (0..n)
            .map(|i| Candle {
                timestamp_ms: i as i64 * 3_600_000,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect();
        compute_indicators(&candles).unwrap()
    }

    fn rising_frame(n: usize, step_pct: f64) -> IndicatorFrame {
        let mut price = 100.0;
        let candles: Vec<Candle> = (0..n)
            .map(|i| {
                let next = price * (1.0 + step_pct / 100.0);
                let c = Candle {
                    timestamp_ms: i as i64 * 3_600_000,
                    open: price,
                    high: next.max(price) * 1.001,
                    low: price.min(next) * 0.999,
                    close: next,
                    volume: 10.0,
                };
                price = next;
                c
            })
            .collect();
        compute_indicators(&candles).unwrap()
    }

    #[test]
    fn test_weights_grow_with_horizon() {
        assert!(WEIGHTS_24H.0 >= WEIGHTS_4H.0 && WEIGHTS_4H.0 >= WEIGHTS_1H.0);
        assert!(WEIGHTS_24H.1 >= WEIGHTS_4H.1 && WEIGHTS_4H.1 >= WEIGHTS_1H.1);
        assert!(WEIGHTS_24H.2 >= WEIGHTS_4H.2 && WEIGHTS_4H.2 >= WEIGHTS_1H.2);
    }

    #[test]
    fn test_flat_series_isolates_rsi_weighting() {
        // Flat closes: momentum = 0 and macd = 0 on every frame, while the
        // loss-free RSI window reads 100, so rsi_factor = -0.5. The forecast
        // deltas then expose the rsi weights directly.
        let blender = PredictionBlender::new();
        let f1h = flat_frame(60);
        let f4h = flat_frame(60);
        let f1d = flat_frame(60);

        let set = blender.blend(&f1h, &f4h, &f1d, 100.0, 72.0).unwrap();

        assert!((set.h1.change_pct - (-5.0)).abs() < 1e-9);
        assert!((set.h4.change_pct - (-10.0)).abs() < 1e-9);
        assert!((set.h24.change_pct - (-15.0)).abs() < 1e-9);

        // Longer horizon weighs the same factor magnitudes harder
        assert!(set.h24.change_pct.abs() >= set.h1.change_pct.abs());
        assert_eq!(set.accuracy, 72.0);
    }

    #[test]
    fn test_outputs_are_finite() {
        let blender = PredictionBlender::new();
        let f1h = rising_frame(60, 1.0);
        let f4h = rising_frame(60, 0.5);
        let f1d = rising_frame(60, 0.2);

        let current = f1h.latest().close;
        let set = blender.blend(&f1h, &f4h, &f1d, current, 72.0).unwrap();

        for p in [&set.h1, &set.h4, &set.h24] {
            assert!(p.price.is_finite());
            assert!(p.change_pct.is_finite());
        }
    }

    #[test]
    fn test_insufficient_lookback_rejected() {
        let blender = PredictionBlender::new();
        let f1h = flat_frame(60);
        let f4h = flat_frame(5); // < 6-candle lookback + 1
        let f1d = flat_frame(60);

        let err = blender.blend(&f1h, &f4h, &f1d, 100.0, 72.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { required: 7, .. }));
    }

    #[test]
    fn test_missing_macd_signal_rejected() {
        let blender = PredictionBlender::new();
        // 30 candles: RSI defined but MACD signal still warming up
        let f1h = flat_frame(30);
        let f4h = flat_frame(60);
        let f1d = flat_frame(60);

        let err = blender.blend(&f1h, &f4h, &f1d, 100.0, 72.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { required: 34, .. }));
    }

    #[test]
    fn test_bad_current_price_rejected() {
        let blender = PredictionBlender::new();
        let frame = flat_frame(60);
        assert!(blender.blend(&frame, &frame, &frame, f64::NAN, 72.0).is_err());
        assert!(blender.blend(&frame, &frame, &frame, 0.0, 72.0).is_err());
    }
}
