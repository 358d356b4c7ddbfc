// Indicator Engine - Pure transforms over a candle series
// Every derived column is causal: the value at index i depends only on
// indices <= i. Values before a window fills are None, never zero.
//
// Conventions (pinned for reproducibility):
// - EMA(n) seeds with the first raw close; values reported from index n-1.
// - RSI(14) uses a simple rolling mean of gains/losses, not Wilder smoothing.
// - Bollinger stddev is the population deviation.

use serde::Serialize;

use crate::analysis::AnalysisError;
use crate::core::types::Candle;

pub const SMA_PERIOD: usize = 20;
pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;
pub const RSI_PERIOD: usize = 14;
pub const MACD_SIGNAL_PERIOD: usize = 9;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_MULT: f64 = 2.0;
pub const VOLUME_SMA_PERIOD: usize = 20;

/// A candle series extended with derived indicator columns
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorFrame {
    pub candles: Vec<Candle>,
    pub sma_20: Vec<Option<f64>>,
    pub ema_12: Vec<Option<f64>>,
    pub ema_26: Vec<Option<f64>>,
    pub rsi_14: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_hist: Vec<Option<f64>>,
    pub bb_upper: Vec<Option<f64>>,
    pub bb_middle: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
    pub pivot: Vec<f64>,
    pub r1: Vec<f64>,
    pub s1: Vec<f64>,
    pub volume_sma_20: Vec<Option<f64>>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest_index(&self) -> usize {
        self.candles.len() - 1
    }

    pub fn latest(&self) -> &Candle {
        &self.candles[self.latest_index()]
    }

    /// Percentage change of close over the trailing `lookback` candles
    pub fn change_pct_over(&self, lookback: usize) -> Option<f64> {
        let len = self.candles.len();
        if len <= lookback {
            return None;
        }
        let past = self.candles[len - 1 - lookback].close;
        if past.abs() <= f64::EPSILON {
            return None;
        }
        Some((self.candles[len - 1].close - past) / past * 100.0)
    }
}

/// Compute the full indicator frame for a series.
/// Fails only when the series has fewer than 2 candles; warm-up gaps are
/// expressed as None in the affected columns.
pub fn compute_indicators(candles: &[Candle]) -> Result<IndicatorFrame, AnalysisError> {
    if candles.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            required: 2,
            available: candles.len(),
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let sma_20 = sma(&closes, SMA_PERIOD);
    let ema_12 = ema(&closes, EMA_FAST_PERIOD);
    let ema_26 = ema(&closes, EMA_SLOW_PERIOD);
    let rsi_14 = rsi(&closes, RSI_PERIOD);

    let macd: Vec<Option<f64>> = ema_12
        .iter()
        .zip(ema_26.iter())
        .map(|(fast, slow)| match (fast, slow) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();
    let macd_signal = ema_of_sparse(&macd, MACD_SIGNAL_PERIOD);
    let macd_hist: Vec<Option<f64>> = macd
        .iter()
        .zip(macd_signal.iter())
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(m - s),
            _ => None,
        })
        .collect();

    let bb_middle = sma(&closes, BB_PERIOD);
    let bb_std = rolling_std(&closes, BB_PERIOD);
    let bb_upper: Vec<Option<f64>> = bb_middle
        .iter()
        .zip(bb_std.iter())
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(m + BB_STD_MULT * s),
            _ => None,
        })
        .collect();
    let bb_lower: Vec<Option<f64>> = bb_middle
        .iter()
        .zip(bb_std.iter())
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(m - BB_STD_MULT * s),
            _ => None,
        })
        .collect();

    // Per-candle floor-trader levels from that candle's own H/L/C
    let mut pivot = Vec::with_capacity(candles.len());
    let mut r1 = Vec::with_capacity(candles.len());
    let mut s1 = Vec::with_capacity(candles.len());
    for c in candles {
        let p = (c.high + c.low + c.close) / 3.0;
        pivot.push(p);
        r1.push(2.0 * p - c.low);
        s1.push(2.0 * p - c.high);
    }

    Ok(IndicatorFrame {
        candles: candles.to_vec(),
        sma_20,
        ema_12,
        ema_26,
        rsi_14,
        macd,
        macd_signal,
        macd_hist,
        bb_upper,
        bb_middle,
        bb_lower,
        pivot,
        r1,
        s1,
        volume_sma_20: sma(&volumes, VOLUME_SMA_PERIOD),
    })
}

/// Arithmetic mean over the trailing `period` values
fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average, smoothing 2/(period+1), seeded with the first
/// value. The warm-up run before index period-1 is computed but not reported.
fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = values[0];
    for (i, &value) in values.iter().enumerate() {
        if i > 0 {
            current = alpha * value + (1.0 - alpha) * current;
        }
        if i >= period - 1 {
            out[i] = Some(current);
        }
    }
    out
}

/// EMA over a column with a leading None run (the MACD line). The EMA starts
/// at the column's first defined value and is reported once `period` defined
/// values have been seen.
fn ema_of_sparse(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let Some(first_defined) = values.iter().position(Option::is_some) else {
        return out;
    };

    let defined: Vec<f64> = values[first_defined..].iter().filter_map(|v| *v).collect();
    let inner = ema(&defined, period);
    for (offset, value) in inner.into_iter().enumerate() {
        out[first_defined + offset] = value;
    }
    out
}

/// Population standard deviation over the trailing `period` values
fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        out[i] = Some(variance.sqrt());
    }
    out
}

/// RSI over trailing `period` diffs, simple rolling mean of gains and losses.
/// All-gain windows read 100 (the loss=0 guard), all-loss windows read 0.
fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if closes.len() <= period {
        return out;
    }

    for i in period..closes.len() {
        let mut gain_sum = 0.0;
        let mut loss_sum = 0.0;
        for j in (i + 1 - period)..=i {
            let diff = closes[j] - closes[j - 1];
            if diff > 0.0 {
                gain_sum += diff;
            } else {
                loss_sum += -diff;
            }
        }

        let value = if loss_sum <= 0.0 {
            100.0
        } else {
            let rs = (gain_sum / period as f64) / (loss_sum / period as f64);
            100.0 - 100.0 / (1.0 + rs)
        };
        out[i] = Some(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candle(ts: i64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    /// Closes rising 1% per step with constant volume
    fn rising_series(n: usize) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(n);
        let mut price = 100.0;
        for i in 0..n {
            candles.push(Candle {
                timestamp_ms: i as i64 * 3_600_000,
                open: price,
                high: price * 1.011,
                low: price * 0.999,
                close: price * 1.01,
                volume: 50.0,
            });
            price *= 1.01;
        }
        candles
    }

    #[test]
    fn test_too_few_candles() {
        let candles = vec![flat_candle(0, 100.0, 1.0)];
        assert!(matches!(
            compute_indicators(&candles),
            Err(AnalysisError::InsufficientData { required: 2, available: 1 })
        ));
    }

    #[test]
    fn test_sma_matches_window_mean() {
        let candles = rising_series(60);
        let frame = compute_indicators(&candles).unwrap();

        for i in 0..19 {
            assert!(frame.sma_20[i].is_none(), "SMA defined too early at {}", i);
        }
        for i in 19..60 {
            let expected: f64 =
                candles[i + 1 - 20..=i].iter().map(|c| c.close).sum::<f64>() / 20.0;
            let got = frame.sma_20[i].unwrap();
            assert!((got - expected).abs() < 1e-9, "SMA mismatch at {}", i);
        }
    }

    #[test]
    fn test_rsi_bounds_and_extremes() {
        // Monotonic rise: all diffs are gains, RSI pins at 100
        let rising = rising_series(30);
        let frame = compute_indicators(&rising).unwrap();
        for i in 0..14 {
            assert!(frame.rsi_14[i].is_none());
        }
        for i in 14..30 {
            let rsi = frame.rsi_14[i].unwrap();
            assert!((0.0..=100.0).contains(&rsi));
            assert!((rsi - 100.0).abs() < 1e-9, "all-gain RSI should be 100");
        }

        // Monotonic fall: all diffs are losses, RSI pins at 0
        let falling: Vec<Candle> = (0..30)
            .map(|i| flat_candle(i as i64 * 3_600_000, 100.0 - i as f64, 10.0))
            .collect();
        let frame = compute_indicators(&falling).unwrap();
        assert!((frame.rsi_14[29].unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_flat_series_hits_loss_zero_guard() {
        let flat: Vec<Candle> = (0..20)
            .map(|i| flat_candle(i as i64 * 3_600_000, 100.0, 10.0))
            .collect();
        let frame = compute_indicators(&flat).unwrap();
        // No losses in the window at all
        assert_eq!(frame.rsi_14[19], Some(100.0));
    }

    #[test]
    fn test_bollinger_ordering_and_widening() {
        let candles = rising_series(60);
        let frame = compute_indicators(&candles).unwrap();

        let mut last_width: Option<f64> = None;
        for i in 19..60 {
            let upper = frame.bb_upper[i].unwrap();
            let middle = frame.bb_middle[i].unwrap();
            let lower = frame.bb_lower[i].unwrap();
            assert!(upper >= middle && middle >= lower, "band ordering broken at {}", i);

            // A steady percentage trend grows the absolute window deviation
            let width = upper - lower;
            if let Some(prev) = last_width {
                assert!(width >= prev - 1e-9, "bands should widen along the trend");
            }
            last_width = Some(width);
        }
    }

    #[test]
    fn test_macd_availability_offsets() {
        let candles = rising_series(60);
        let frame = compute_indicators(&candles).unwrap();

        assert!(frame.macd[24].is_none());
        assert!(frame.macd[25].is_some());
        assert!(frame.macd_signal[32].is_none());
        assert!(frame.macd_signal[33].is_some());
        assert!(frame.macd_hist[33].is_some());

        let m = frame.macd[40].unwrap();
        let s = frame.macd_signal[40].unwrap();
        let h = frame.macd_hist[40].unwrap();
        assert!((h - (m - s)).abs() < 1e-12);
    }

    #[test]
    fn test_ema_seeding_convention() {
        let closes = [10.0, 11.0, 12.0, 13.0];
        let out = ema(&closes, 3);
        assert!(out[0].is_none());
        assert!(out[1].is_none());

        // Seeded at 10, alpha = 0.5
        let e1 = 0.5 * 11.0 + 0.5 * 10.0;
        let e2 = 0.5 * 12.0 + 0.5 * e1;
        let e3 = 0.5 * 13.0 + 0.5 * e2;
        assert!((out[2].unwrap() - e2).abs() < 1e-12);
        assert!((out[3].unwrap() - e3).abs() < 1e-12);
    }

    #[test]
    fn test_pivot_levels_from_own_candle() {
        let candles = rising_series(10);
        let frame = compute_indicators(&candles).unwrap();

        for (i, c) in candles.iter().enumerate() {
            let p = (c.high + c.low + c.close) / 3.0;
            assert!((frame.pivot[i] - p).abs() < 1e-12);
            assert!((frame.r1[i] - (2.0 * p - c.low)).abs() < 1e-12);
            assert!((frame.s1[i] - (2.0 * p - c.high)).abs() < 1e-12);
            assert!(frame.r1[i] >= frame.s1[i]);
        }
    }

    #[test]
    fn test_change_pct_over() {
        let candles = rising_series(30);
        let frame = compute_indicators(&candles).unwrap();

        let change = frame.change_pct_over(10).unwrap();
        // 1% compounding over 10 steps
        let expected = (1.01f64.powi(10) - 1.0) * 100.0;
        assert!((change - expected).abs() < 1e-6);
        assert!(frame.change_pct_over(30).is_none());
    }
}
