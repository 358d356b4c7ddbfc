// Data Collector - Periodic OHLCV pull into the series store

use std::sync::Arc;
use tracing::{debug, info};

use crate::core::types::Granularity;
use crate::market::client::{MarketDataClient, MarketDataError};
use crate::store::series::SeriesStore;

/// Pulls fresh candles for every granularity and merges them into the store.
/// Gaps and duplicates from the feed are absorbed by the store's
/// merge-by-timestamp rule.
pub struct DataCollector {
    client: Arc<MarketDataClient>,
    series: Arc<SeriesStore>,
    limit: u32,
}

impl DataCollector {
    pub fn new(client: Arc<MarketDataClient>, series: Arc<SeriesStore>, limit: u32) -> Self {
        Self { client, series, limit }
    }

    /// One collection pass; returns the total candles accepted
    pub async fn collect(&self) -> Result<usize, MarketDataError> {
        let mut total = 0usize;

        for granularity in Granularity::all() {
            let candles = self.client.fetch_klines(granularity, self.limit).await?;
            let accepted = self.series.append(granularity, &candles);
            debug!(
                granularity = %granularity,
                fetched = candles.len(),
                accepted = accepted,
                "Collected candles"
            );
            total += accepted;
        }

        info!(accepted = total, "Market data collection pass complete");
        Ok(total)
    }
}
