// Market Oracle - Application entry point
// Loads config, wires the shared context, and runs the periodic cycle until
// interrupted

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use market_oracle::analysis::{AnalysisEngine, InferenceClient, ModelState};
use market_oracle::core::{setup_logging, AppConfig};
use market_oracle::market::{DataCollector, MarketDataClient};
use market_oracle::scheduler::{spawn_periodic, TaskSpec};
use market_oracle::store::{AnalysisCache, JsonFileStore, SeriesStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref())?;
    setup_logging(
        Some(&config.monitoring.log_level),
        Some(config.monitoring.json_format),
    );

    if !config.validate() {
        return Err("invalid configuration".into());
    }

    info!(instrument = %config.market.instrument, "Starting Market Oracle");

    // Shared context, constructed once and passed explicitly
    let series = Arc::new(SeriesStore::new(
        &config.market.instrument,
        config.analysis.max_candles,
    ));
    let cache = Arc::new(AnalysisCache::new());
    let market_client = Arc::new(MarketDataClient::from_config(&config.market)?);
    let inference = Arc::new(InferenceClient::from_config(&config.inference, cache.clone())?);

    let data_dir = std::path::Path::new(&config.storage.data_dir);
    let results = Arc::new(JsonFileStore::new(data_dir.join(&config.storage.results_file))?);
    let model = Arc::new(ModelState::open(data_dir.join(&config.storage.model_params_file)));

    let engine = Arc::new(AnalysisEngine::new(
        &config,
        series.clone(),
        cache,
        inference,
        model,
        results,
    ));
    let collector = Arc::new(DataCollector::new(
        market_client,
        series,
        config.market.collect_limit,
    ));

    // Seed the buffers before the periodic tasks take over
    if let Err(e) = collector.collect().await {
        warn!(error = %e, "Initial market data collection failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sched = &config.scheduler;

    let collect_task = {
        let collector = collector.clone();
        spawn_periodic(
            TaskSpec {
                name: "data_collection",
                period: Duration::from_secs(sched.collect_interval_seconds),
                error_backoff: Duration::from_secs(sched.collect_backoff_seconds),
            },
            shutdown_rx.clone(),
            move || {
                let collector = collector.clone();
                async move {
                    collector.collect().await?;
                    Ok(())
                }
            },
        )
    };

    let analysis_task = {
        let engine = engine.clone();
        spawn_periodic(
            TaskSpec {
                name: "analysis_refresh",
                period: Duration::from_secs(sched.analysis_interval_seconds),
                error_backoff: Duration::from_secs(sched.analysis_backoff_seconds),
            },
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    engine.current_analysis().await?;
                    engine.price_predictions().await?;
                    Ok(())
                }
            },
        )
    };

    let retrain_task = {
        let engine = engine.clone();
        spawn_periodic(
            TaskSpec {
                name: "model_retrain",
                period: Duration::from_secs(sched.retrain_interval_seconds),
                error_backoff: Duration::from_secs(sched.retrain_backoff_seconds),
            },
            shutdown_rx,
            move || {
                let engine = engine.clone();
                async move {
                    engine.retrain().await?;
                    Ok(())
                }
            },
        )
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in [collect_task, analysis_task, retrain_task] {
        let _ = handle.await;
    }

    info!(stats = %engine.get_stats(), "Market Oracle stopped");
    Ok(())
}
