// Series Store - In-memory, time-ordered OHLCV buffers
// One sorted buffer per granularity; merge-by-timestamp append,
// replace-on-conflict; read-only windowed snapshots out

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{Candle, Granularity};

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },
}

/// Statistics snapshot from the series store
#[derive(Debug, Clone)]
pub struct SeriesStoreStats {
    pub appended: u64,
    pub replaced: u64,
    pub rejected: u64,
    pub candles_held: usize,
}

impl fmt::Display for SeriesStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SeriesStore(appended={}, replaced={}, rejected={}, held={})",
            self.appended, self.replaced, self.rejected, self.candles_held
        )
    }
}

/// Source of truth for all computation: the OHLCV history of one instrument
/// across its granularities. Strictly increasing timestamps, no duplicates.
pub struct SeriesStore {
    pub instrument: String,
    buffers: RwLock<HashMap<Granularity, Vec<Candle>>>,
    max_candles: usize,

    appended: RwLock<u64>,
    replaced: RwLock<u64>,
    rejected: RwLock<u64>,
}

impl SeriesStore {
    pub fn new(instrument: &str, max_candles: usize) -> Self {
        Self {
            instrument: instrument.to_uppercase(),
            buffers: RwLock::new(HashMap::new()),
            max_candles,
            appended: RwLock::new(0),
            replaced: RwLock::new(0),
            rejected: RwLock::new(0),
        }
    }

    /// Merge candles into the buffer for one granularity.
    /// Same timestamp replaces the existing candle; new timestamps insert in
    /// sorted position. Malformed candles are dropped, not stored as zeros.
    /// Returns the number of candles accepted.
    pub fn append(&self, granularity: Granularity, candles: &[Candle]) -> usize {
        let mut accepted = 0usize;
        let mut buffers = self.buffers.write();
        let buffer = buffers.entry(granularity).or_default();

        for candle in candles {
            if !candle.is_well_formed() {
                *self.rejected.write() += 1;
                debug!(
                    instrument = %self.instrument,
                    granularity = %granularity,
                    timestamp_ms = candle.timestamp_ms,
                    "Rejected malformed candle"
                );
                continue;
            }

            match buffer.binary_search_by_key(&candle.timestamp_ms, |c| c.timestamp_ms) {
                Ok(pos) => {
                    buffer[pos] = *candle;
                    *self.replaced.write() += 1;
                }
                Err(pos) => {
                    buffer.insert(pos, *candle);
                    *self.appended.write() += 1;
                }
            }
            accepted += 1;
        }

        // Bound memory: keep only the newest candles
        if buffer.len() > self.max_candles {
            let excess = buffer.len() - self.max_candles;
            buffer.drain(..excess);
        }

        accepted
    }

    /// The most recent `count` candles (fewer if the buffer is shorter),
    /// failing when less than `min` history exists.
    pub fn window(
        &self,
        granularity: Granularity,
        count: usize,
        min: usize,
    ) -> Result<Vec<Candle>, SeriesError> {
        let buffers = self.buffers.read();
        let buffer = buffers.get(&granularity).map(Vec::as_slice).unwrap_or(&[]);

        if buffer.len() < min {
            return Err(SeriesError::InsufficientData {
                required: min,
                available: buffer.len(),
            });
        }

        let start = buffer.len().saturating_sub(count);
        Ok(buffer[start..].to_vec())
    }

    pub fn len(&self, granularity: Granularity) -> usize {
        self.buffers
            .read()
            .get(&granularity)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, granularity: Granularity) -> bool {
        self.len(granularity) == 0
    }

    pub fn latest_close(&self, granularity: Granularity) -> Option<f64> {
        self.buffers
            .read()
            .get(&granularity)
            .and_then(|buffer| buffer.last())
            .map(|candle| candle.close)
    }

    pub fn get_stats(&self) -> SeriesStoreStats {
        let held = self.buffers.read().values().map(Vec::len).sum();
        SeriesStoreStats {
            appended: *self.appended.read(),
            replaced: *self.replaced.read(),
            rejected: *self.rejected.read(),
            candles_held: held,
        }
    }
}

impl fmt::Display for SeriesStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesStore({}, {})", self.instrument, self.get_stats())
    }
}
