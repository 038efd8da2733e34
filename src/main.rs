/// Main entry point for the market data service
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tickervault::{
    config::load_config,
    data::IngestionService,
    indicators::IndicatorEngine,
    scheduler::{Scheduler, SchedulerHandle},
    Config,
};

/// Application state
pub struct MarketDataApp {
    config: Arc<Config>,
    ingestion: Arc<IngestionService>,
    engine: IndicatorEngine,
}

impl MarketDataApp {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let ingestion = IngestionService::from_config(&config)
            .context("Failed to create ingestion service")?;
        let engine = IndicatorEngine::from_specs(&config.indicators)
            .context("Invalid indicator configuration")?;

        Ok(MarketDataApp {
            config: Arc::new(config),
            ingestion: Arc::new(ingestion),
            engine,
        })
    }

    /// Load cache, fill in missing tickers and compute indicators
    async fn initialize(&self) -> anyhow::Result<()> {
        info!("Initializing market data store...");

        let loaded = self
            .ingestion
            .load_cache(self.config.cache.prefer_json)
            .await
            .context("Failed to load cache")?;
        if !loaded {
            info!("Starting with an empty store");
        }

        self.ingestion.add_tickers(&self.config.watchlist).await;

        // Partial failures are fine here; the daily refresh retries them
        if let Err(e) = self.ingestion.sync_missing_tickers().await {
            warn!("[{}] Initial sync incomplete: {}", e.error_code(), e);
        }

        match self
            .engine
            .recompute_all(self.ingestion.history(), self.ingestion.watchlist())
            .await
        {
            Ok(count) => info!("Indicators ready for {} tickers", count),
            Err(e) => warn!("Indicator recompute failed: {}", e),
        }

        self.ingestion
            .persist_cache()
            .await
            .context("Failed to persist cache")?;

        info!(
            "Store ready: {} tickers watched, {} rows",
            self.ingestion.watchlist().len().await,
            self.ingestion.history().row_count().await
        );
        Ok(())
    }

    fn start_scheduler(&self) -> anyhow::Result<SchedulerHandle> {
        let scheduler = Scheduler::from_config(
            Arc::clone(&self.ingestion),
            self.engine.clone(),
            &self.config,
        )?;
        Ok(scheduler.start())
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        self.initialize().await?;

        let scheduler = self.start_scheduler()?;
        info!("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received - initiating graceful shutdown");

        scheduler.stop().await;

        self.ingestion
            .persist_cache()
            .await
            .context("Failed to persist cache on shutdown")?;

        info!("Shutdown complete");
        Ok(())
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tickervault={},info", config.log_level)));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    init_logging(&config);
    info!("Starting market data service...");

    let app = MarketDataApp::new(config)?;
    app.run().await
}
