// Pattern Detector - Rule-based scan over an indicator frame
// Fixed evaluation order; signals are advisory and recomputed per request.
// Rules whose indicator inputs are still warming up are skipped, not errored.

use tracing::debug;

use crate::analysis::indicators::IndicatorFrame;
use crate::analysis::AnalysisError;
use crate::core::config::PatternThresholds;
use crate::core::types::{PatternKind, PatternSignal};

/// How many trailing candles the order-flow rule inspects
const ORDER_FLOW_WINDOW: usize = 3;
/// How many most-recent fair value gaps are reported
const FVG_KEEP: usize = 5;

pub struct PatternDetector {
    thresholds: PatternThresholds,
}

impl PatternDetector {
    pub fn new(thresholds: PatternThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate all rules. Single-candle rules fire at the latest index;
    /// order-flow inspects the last three candles; the fair-value-gap scan
    /// reports the last five occurrences.
    pub fn detect(&self, frame: &IndicatorFrame) -> Result<Vec<PatternSignal>, AnalysisError> {
        if frame.len() < 3 {
            return Err(AnalysisError::InsufficientData {
                required: 3,
                available: frame.len(),
            });
        }

        let mut signals = Vec::new();
        let i = frame.latest_index();
        let latest = frame.latest();

        // 1. Doji: body lost in the wick range
        if latest.body() < self.thresholds.doji_body_ratio * latest.range() {
            signals.push(PatternSignal { kind: PatternKind::Doji, index: i });
        }

        // 2. Band breakout (mutually exclusive directions)
        if let (Some(upper), Some(lower)) = (frame.bb_upper[i], frame.bb_lower[i]) {
            if latest.close > upper {
                signals.push(PatternSignal { kind: PatternKind::BandBreakoutBullish, index: i });
            } else if latest.close < lower {
                signals.push(PatternSignal { kind: PatternKind::BandBreakoutBearish, index: i });
            }
        }

        // 3. RSI extremes
        if let Some(rsi) = frame.rsi_14[i] {
            if rsi > self.thresholds.rsi_overbought {
                signals.push(PatternSignal { kind: PatternKind::RsiOverbought, index: i });
            } else if rsi < self.thresholds.rsi_oversold {
                signals.push(PatternSignal { kind: PatternKind::RsiOversold, index: i });
            }
        }

        // 4. Volume spike against the volume average
        if let Some(volume_sma) = frame.volume_sma_20[i] {
            if latest.volume > self.thresholds.volume_spike_ratio * volume_sma {
                signals.push(PatternSignal { kind: PatternKind::VolumeSpike, index: i });
            }
        }

        // 5. Order flow over the trailing window
        self.detect_order_flow(frame, &mut signals);

        // 6. Fair value gaps, most recent occurrences only
        self.detect_fair_value_gaps(frame, &mut signals);

        debug!(signals = signals.len(), "Pattern scan complete");
        Ok(signals)
    }

    fn detect_order_flow(&self, frame: &IndicatorFrame, signals: &mut Vec<PatternSignal>) {
        let len = frame.len();
        let start = len.saturating_sub(ORDER_FLOW_WINDOW).max(1);

        for i in start..len {
            let current = &frame.candles[i];
            let previous = &frame.candles[i - 1];

            let price_change = current.close - previous.close;
            let volume_ratio = if previous.volume > 0.0 {
                current.volume / previous.volume
            } else {
                1.0
            };

            let kind = if price_change > 0.0 && volume_ratio > self.thresholds.orderflow_volume_ratio {
                Some(PatternKind::BuyingPressure)
            } else if price_change < 0.0 && volume_ratio > self.thresholds.orderflow_volume_ratio {
                Some(PatternKind::SellingPressure)
            } else if price_change.abs()
                < current.close * (self.thresholds.absorption_price_move_pct / 100.0)
                && volume_ratio > self.thresholds.absorption_volume_ratio
            {
                Some(PatternKind::Absorption)
            } else {
                None
            };

            if let Some(kind) = kind {
                signals.push(PatternSignal { kind, index: i });
            }
        }
    }

    fn detect_fair_value_gaps(&self, frame: &IndicatorFrame, signals: &mut Vec<PatternSignal>) {
        let mut gaps = Vec::new();

        for i in 2..frame.len() {
            let older = &frame.candles[i - 2];
            let current = &frame.candles[i];

            if older.low > current.high {
                gaps.push(PatternSignal {
                    kind: PatternKind::FairValueGapBullish {
                        top: older.low,
                        bottom: current.high,
                    },
                    index: i,
                });
            } else if older.high < current.low {
                gaps.push(PatternSignal {
                    kind: PatternKind::FairValueGapBearish {
                        top: current.low,
                        bottom: older.high,
                    },
                    index: i,
                });
            }
        }

        let keep_from = gaps.len().saturating_sub(FVG_KEEP);
        signals.extend(gaps.drain(keep_from..));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indicators::compute_indicators;
    use crate::core::types::Candle;

    fn detector() -> PatternDetector {
        PatternDetector::new(PatternThresholds::default())
    }

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle { timestamp_ms: ts, open, high, low, close, volume }
    }

    fn steady(n: usize, close: f64, volume: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(i as i64 * 3_600_000, close, close + 1.0, close - 1.0, close, volume))
            .collect()
    }

    fn has_kind(signals: &[PatternSignal], predicate: impl Fn(&PatternKind) -> bool) -> bool {
        signals.iter().any(|s| predicate(&s.kind))
    }

    #[test]
    fn test_insufficient_data() {
        let frame = compute_indicators(&steady(2, 100.0, 10.0)).unwrap();
        assert!(matches!(
            detector().detect(&frame),
            Err(AnalysisError::InsufficientData { required: 3, .. })
        ));
    }

    #[test]
    fn test_doji_detected_on_latest() {
        let mut candles = steady(10, 100.0, 10.0);
        // Wide range, tiny body
        candles.push(candle(10 * 3_600_000, 100.0, 105.0, 95.0, 100.05, 10.0));
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::Doji)));
    }

    #[test]
    fn test_band_breakout_bullish() {
        let mut candles = steady(20, 100.0, 10.0);
        // Jump well above the upper band formed by the flat window
        candles.push(candle(20 * 3_600_000, 100.0, 106.0, 99.5, 105.0, 10.0));
        let frame = compute_indicators(&candles).unwrap();
        let i = frame.latest_index();
        assert!(frame.candles[i].close > frame.bb_upper[i].unwrap());

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::BandBreakoutBullish)));
        assert!(!has_kind(&signals, |k| matches!(k, PatternKind::BandBreakoutBearish)));
    }

    #[test]
    fn test_rsi_overbought_on_steady_rise() {
        let mut price = 100.0;
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let c = candle(
                    i as i64 * 3_600_000,
                    price,
                    price * 1.011,
                    price * 0.999,
                    price * 1.01,
                    50.0,
                );
                price *= 1.01;
                c
            })
            .collect();
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::RsiOverbought)));
        assert!(!has_kind(&signals, |k| matches!(k, PatternKind::RsiOversold)));
    }

    #[test]
    fn test_no_rsi_signal_before_warmup() {
        // 10 candles: RSI column still None at the latest index
        let frame = compute_indicators(&steady(10, 100.0, 10.0)).unwrap();
        let signals = detector().detect(&frame).unwrap();
        assert!(!has_kind(&signals, |k| matches!(
            k,
            PatternKind::RsiOverbought | PatternKind::RsiOversold
        )));
    }

    #[test]
    fn test_volume_spike() {
        let mut candles = steady(25, 100.0, 10.0);
        candles.push(candle(25 * 3_600_000, 100.0, 101.0, 99.0, 100.0, 40.0));
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::VolumeSpike)));
    }

    #[test]
    fn test_order_flow_buying_pressure() {
        let mut candles = steady(10, 100.0, 10.0);
        candles.push(candle(10 * 3_600_000, 100.0, 103.0, 99.5, 102.0, 16.0));
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::BuyingPressure)));
    }

    #[test]
    fn test_order_flow_absorption() {
        let mut candles = steady(10, 100.0, 10.0);
        // Heavy volume, price pinned
        candles.push(candle(10 * 3_600_000, 100.0, 101.0, 99.0, 100.0, 20.0));
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        assert!(has_kind(&signals, |k| matches!(k, PatternKind::Absorption)));
    }

    #[test]
    fn test_fair_value_gap_bullish() {
        let mut candles = steady(5, 100.0, 10.0);
        // A two-candle drop leaving the older low above the newer high
        candles.push(candle(5 * 3_600_000, 100.0, 100.5, 95.0, 95.5, 10.0));
        candles.push(candle(6 * 3_600_000, 95.5, 96.0, 90.0, 90.5, 10.0));
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        let gap = signals
            .iter()
            .find(|s| matches!(s.kind, PatternKind::FairValueGapBullish { .. }))
            .expect("bullish gap expected");
        if let PatternKind::FairValueGapBullish { top, bottom } = gap.kind {
            assert_eq!(top, 99.0);
            assert_eq!(bottom, 96.0);
        }
    }

    #[test]
    fn test_fvg_keeps_last_five() {
        // Alternate big drops so every other index forms a gap
        let mut candles = Vec::new();
        let mut price = 1000.0;
        for i in 0..20 {
            candles.push(candle(
                i as i64 * 3_600_000,
                price,
                price + 1.0,
                price - 1.0,
                price,
                10.0,
            ));
            price -= 50.0;
        }
        let frame = compute_indicators(&candles).unwrap();

        let signals = detector().detect(&frame).unwrap();
        let gaps: Vec<_> = signals
            .iter()
            .filter(|s| matches!(s.kind, PatternKind::FairValueGapBullish { .. }))
            .collect();
        assert_eq!(gaps.len(), 5);
        // Most recent occurrences, in order
        assert!(gaps.windows(2).all(|w| w[0].index < w[1].index));
        assert_eq!(gaps.last().unwrap().index, 19);
    }
}
