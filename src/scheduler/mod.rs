/// Background refresh loops with an explicit start/stop lifecycle
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::data::IngestionService;
use crate::error::Result;
use crate::indicators::IndicatorEngine;
use crate::time::TradingWindow;
use crate::types::Config;

/// Latest known price per ticker, shared with readers outside the core
pub type QuoteBoard = Arc<RwLock<HashMap<String, f64>>>;

#[derive(Clone)]
pub struct Scheduler {
    ingestion: Arc<IngestionService>,
    engine: IndicatorEngine,
    quotes: QuoteBoard,
    window: TradingWindow,
    quote_interval: Duration,
    history_interval: Duration,
}

impl Scheduler {
    pub fn new(
        ingestion: Arc<IngestionService>,
        engine: IndicatorEngine,
        window: TradingWindow,
        quote_interval: Duration,
        history_interval: Duration,
    ) -> Self {
        Scheduler {
            ingestion,
            engine,
            quotes: Arc::new(RwLock::new(HashMap::new())),
            window,
            quote_interval,
            history_interval,
        }
    }

    pub fn from_config(
        ingestion: Arc<IngestionService>,
        engine: IndicatorEngine,
        config: &Config,
    ) -> Result<Self> {
        let schedule = &config.schedule;
        Ok(Self::new(
            ingestion,
            engine,
            TradingWindow::from_config(&schedule.trading_window)?,
            Duration::from_secs(schedule.quote_refresh_interval_sec),
            Duration::from_secs(schedule.history_refresh_interval_sec),
        ))
    }

    pub fn quotes(&self) -> QuoteBoard {
        Arc::clone(&self.quotes)
    }

    /// One quote tick. The board is replaced with the fetched quotes, so a
    /// ticker the provider no longer prices drops out. Outside the trading
    /// window nothing is fetched and `Ok(false)` is returned.
    pub async fn refresh_quotes_at(&self, now: DateTime<Utc>) -> Result<bool> {
        if !self.window.contains(now) {
            debug!("Outside trading window at {}, skipping quote refresh", now);
            return Ok(false);
        }

        let quotes = self.ingestion.fetch_current_quotes().await?;
        let count = quotes.len();
        *self.quotes.write().await = quotes;

        debug!("Updated {} quotes", count);
        Ok(true)
    }

    /// Full history refetch, indicator recompute, then persist.
    ///
    /// The sync persists the fetched bars itself, so they survive a failed
    /// recompute. The final write only stores indicator values and is skipped
    /// when the recompute touched no ticker. Every step runs even if an
    /// earlier one failed; the first error is returned.
    pub async fn run_daily_refresh(&self) -> Result<()> {
        info!("Starting daily history refresh");
        let mut first_error = None;

        if let Err(e) = self.ingestion.sync_all_tickers().await {
            error!("[{}] History refresh failed: {}", e.error_code(), e);
            first_error.get_or_insert(e);
        }

        // a failed recompute may still have applied some tickers
        let recomputed = match self
            .engine
            .recompute_all(self.ingestion.history(), self.ingestion.watchlist())
            .await
        {
            Ok(processed) => processed > 0,
            Err(e) => {
                error!("Indicator recompute failed: {}", e);
                first_error.get_or_insert(e);
                true
            }
        };

        if recomputed {
            if let Err(e) = self.ingestion.persist_cache().await {
                error!("Cache persist failed: {}", e);
                first_error.get_or_insert(e);
            }
        } else {
            debug!("No indicator values changed, cache already current");
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Daily history refresh complete");
                Ok(())
            }
        }
    }

    /// Spawn both loops. The daily loop's first run is one interval from now.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let quote_task = {
            let scheduler = self.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.quote_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = scheduler.refresh_quotes_at(Utc::now()).await {
                                warn!("[{}] Quote refresh failed: {}", e.error_code(), e);
                            }
                        }
                    }
                }
                debug!("Quote loop stopped");
            })
        };

        let history_task = {
            let scheduler = self;
            let mut shutdown = shutdown_rx;
            tokio::spawn(async move {
                let period = scheduler.history_interval;
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            // already logged per step
                            let _ = scheduler.run_daily_refresh().await;
                        }
                    }
                }
                debug!("History loop stopped");
            })
        };

        info!("Scheduler started");
        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks: vec![quote_task, history_task],
        }
    }
}

/// Owner of the running loops
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal both loops and wait for them to finish their current tick
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}
