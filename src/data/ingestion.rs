/// Ingestion service: watchlist, provider fetches, merge and cache
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{self, JoinSet};
use tracing::{error, info, warn};

use crate::data::history::{PackedHistory, SharedHistory};
use crate::data::snapshot::SnapshotCache;
use crate::error::{MarketDataError, Result};
use crate::provider::TiingoClient;
use crate::types::Config;
use crate::utils::SymbolSet;

/// Outcome of one history fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub timestamp: DateTime<Utc>,
    pub requested: usize,
    pub synced: Vec<String>,
    pub failed: Vec<String>,
    pub bars_merged: usize,
    pub rows_created: usize,
}

impl SyncReport {
    fn new(requested: usize) -> Self {
        SyncReport {
            timestamp: Utc::now(),
            requested,
            synced: Vec::new(),
            failed: Vec::new(),
            bars_merged: 0,
            rows_created: 0,
        }
    }
}

/// Counts from merging one ticker's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub bars: usize,
    pub rows_created: usize,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A ticker reserved for one fetch task; released on drop,
/// including when the task panics or is aborted.
struct FetchClaim {
    symbol: String,
    in_flight: InFlight,
}

impl Drop for FetchClaim {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.symbol);
    }
}

type FetchSet = JoinSet<(String, Result<MergeStats>)>;

pub struct IngestionService {
    client: TiingoClient,
    watchlist: SymbolSet,
    history: SharedHistory,
    cache: SnapshotCache,
    in_flight: InFlight,
}

impl IngestionService {
    pub fn new(client: TiingoClient, cache: SnapshotCache) -> Self {
        IngestionService {
            client,
            watchlist: SymbolSet::new(),
            history: SharedHistory::new(),
            cache,
            in_flight: InFlight::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = TiingoClient::new(&config.provider)?;
        Ok(Self::new(client, SnapshotCache::new(&config.cache)))
    }

    pub fn watchlist(&self) -> &SymbolSet {
        &self.watchlist
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// Add symbols (uppercased) to the watchlist without fetching.
    /// Returns how many were new.
    pub async fn add_tickers<I, S>(&self, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: Vec<String> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let added = self.watchlist.insert(normalized).await;
        if added > 0 {
            info!("Added {} tickers to watchlist", added);
        }
        added
    }

    /// Latest price for every watched ticker, in one request
    pub async fn fetch_current_quotes(&self) -> Result<HashMap<String, f64>> {
        let tickers = self.watchlist.all().await;
        self.client.fetch_quotes(&tickers).await
    }

    /// Fetch one ticker's full history and merge it into the store.
    ///
    /// A ticker the provider does not know is dropped from the watchlist.
    pub async fn fetch_historical_bars(&self, symbol: &str) -> Result<MergeStats> {
        let bars = match self.client.fetch_daily_history(symbol).await {
            Ok(bars) => bars,
            Err(e) => {
                if e.is_ticker_not_found() {
                    self.watchlist.remove([symbol]).await;
                    warn!("Removed {} from watchlist", symbol);
                }
                return Err(e);
            }
        };

        let dated: Vec<_> = bars.into_iter().map(|bar| bar.into_dated_bar()).collect();
        let bars = dated.len();
        let rows_created = self.history.merge_ticker_bars(symbol, dated).await;

        Ok(MergeStats { bars, rows_created })
    }

    /// Fetch history for watched tickers that have no data yet.
    /// Tickers another sync is already fetching are skipped.
    pub async fn sync_missing_tickers(self: &Arc<Self>) -> Result<SyncReport> {
        let symbols = self.watchlist.all().await;
        let claims = self.claim(symbols, true).await;
        info!("Syncing {} missing tickers", claims.len());
        self.sync_tickers(claims).await
    }

    /// Refetch history for every watched ticker not already in flight
    pub async fn sync_all_tickers(self: &Arc<Self>) -> Result<SyncReport> {
        let symbols = self.watchlist.all().await;
        let claims = self.claim(symbols, false).await;
        info!("Refreshing history for {} tickers", claims.len());
        self.sync_tickers(claims).await
    }

    /// Refetch one ticker and persist, regardless of what the store holds
    pub async fn refresh_ticker(&self, symbol: &str) -> Result<MergeStats> {
        let symbol = symbol.trim().to_uppercase();
        self.watchlist.insert([symbol.clone()]).await;

        let stats = self.fetch_historical_bars(&symbol).await?;
        self.persist_cache().await?;
        Ok(stats)
    }

    // Claims are taken under the history read lock and released only after
    // the merge, so a ticker is always either in flight or already stored.
    async fn claim(&self, symbols: Vec<String>, missing_only: bool) -> Vec<FetchClaim> {
        let history = self.history.read().await;
        let mut in_flight = lock_in_flight(&self.in_flight);

        let mut claims = Vec::new();
        let mut busy = 0;
        for symbol in symbols {
            if missing_only && history.tickers().contains_key(&symbol) {
                continue;
            }
            if !in_flight.insert(symbol.clone()) {
                busy += 1;
                continue;
            }
            claims.push(FetchClaim {
                symbol,
                in_flight: Arc::clone(&self.in_flight),
            });
        }

        if busy > 0 {
            info!("Skipping {} tickers already being fetched", busy);
        }
        claims
    }

    fn spawn_fetches(
        self: &Arc<Self>,
        claims: Vec<FetchClaim>,
    ) -> (FetchSet, HashMap<task::Id, String>) {
        let mut tasks = JoinSet::new();
        let mut symbols = HashMap::new();
        for claim in claims {
            let service = Arc::clone(self);
            let symbol = claim.symbol.clone();
            let handle = tasks.spawn(async move {
                let result = service.fetch_historical_bars(&claim.symbol).await;
                (claim.symbol.clone(), result)
            });
            symbols.insert(handle.id(), symbol);
        }
        (tasks, symbols)
    }

    // One task per ticker; the first error is kept, the rest still run.
    // The cache is persisted whatever the outcome.
    async fn sync_tickers(self: &Arc<Self>, claims: Vec<FetchClaim>) -> Result<SyncReport> {
        let total = claims.len();
        let mut report = SyncReport::new(total);

        let (tasks, symbols) = self.spawn_fetches(claims);
        let first_error = collect_fetches(tasks, symbols, &mut report).await;

        let persisted = self.persist_cache().await;

        info!(
            "Sync complete: {}/{} tickers, {} bars, {} new rows",
            report.synced.len(),
            total,
            report.bars_merged,
            report.rows_created
        );

        match first_error {
            Some(first) => {
                if let Err(e) = persisted {
                    error!("Cache persist after failed sync also failed: {}", e);
                }
                Err(MarketDataError::SyncFailed {
                    failed: report.failed.len(),
                    total,
                    first: Box::new(first),
                })
            }
            None => persisted.map(|_| report),
        }
    }

    /// Replace the store with the cached snapshot, if one exists.
    /// Returns whether a snapshot was loaded.
    pub async fn load_cache(&self, prefer_json: bool) -> Result<bool> {
        match self.cache.load(prefer_json).await? {
            Some(history) => {
                self.history.replace(history).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn persist_cache(&self) -> Result<()> {
        let packed = self.history.pack().await;
        self.cache.persist(&packed).await
    }

    /// Whole store in its portable shape
    pub async fn snapshot(&self) -> PackedHistory {
        self.history.pack().await
    }
}

/// Drain the fetch tasks into `report`, returning the first error seen
async fn collect_fetches(
    mut tasks: FetchSet,
    symbols: HashMap<task::Id, String>,
    report: &mut SyncReport,
) -> Option<MarketDataError> {
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((symbol, Ok(stats))) => {
                report.bars_merged += stats.bars;
                report.rows_created += stats.rows_created;
                report.synced.push(symbol);
            }
            Ok((symbol, Err(e))) => {
                error!("[{}] Failed to sync {}: {}", e.error_code(), symbol, e);
                report.failed.push(symbol);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                let symbol = symbols
                    .get(&e.id())
                    .cloned()
                    .unwrap_or_else(|| e.id().to_string());
                error!("Sync task for {} failed: {}", symbol, e);
                let failure = MarketDataError::TaskFailed(format!("{}: {}", symbol, e));
                report.failed.push(symbol);
                first_error.get_or_insert(failure);
            }
        }
    }

    report.synced.sort();
    report.failed.sort();
    first_error
}
