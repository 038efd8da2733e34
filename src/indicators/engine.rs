/// Parallel indicator recomputation across watched tickers
use chrono::NaiveDate;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{build_indicators, Indicator, SeriesAccess, MISSING_BAR};
use crate::data::history::{History, SharedHistory};
use crate::error::{MarketDataError, Result};
use crate::types::IndicatorSpec;
use crate::utils::SymbolSet;

/// (date, indicator name, value) computed for one ticker
pub type IndicatorUpdate = (NaiveDate, String, f64);

struct Slot {
    target: f64,
    indicators: BTreeMap<String, f64>,
}

/// Owned copy of one ticker's row window
///
/// Tasks compute on this copy and hand back updates, so no task ever
/// touches the shared rows.
pub struct TickerWindow {
    symbol: String,
    dates: Vec<NaiveDate>,
    slots: Vec<Option<Slot>>,
    written: BTreeSet<String>,
}

impl TickerWindow {
    /// Copy the rows between the ticker's first and last date
    pub fn capture(history: &History, symbol: &str) -> Option<Self> {
        let (start, end) = history.ticker_window(symbol)?;
        let rows = &history.rows()[start..=end];

        Some(TickerWindow {
            symbol: symbol.to_string(),
            dates: rows.iter().map(|row| row.date).collect(),
            slots: rows
                .iter()
                .map(|row| {
                    row.bars.get(symbol).map(|bar| Slot {
                        target: bar.adj_close,
                        indicators: bar.indicators.clone(),
                    })
                })
                .collect(),
            written: BTreeSet::new(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Values written by indicators, for rows where the ticker has a bar
    pub fn into_updates(self) -> Vec<IndicatorUpdate> {
        let mut updates = Vec::new();
        for (date, slot) in self.dates.into_iter().zip(self.slots) {
            let Some(slot) = slot else { continue };
            for name in &self.written {
                if let Some(value) = slot.indicators.get(name) {
                    updates.push((date, name.clone(), *value));
                }
            }
        }
        updates
    }
}

impl SeriesAccess for TickerWindow {
    fn len(&self) -> usize {
        self.slots.len()
    }

    fn target(&self, offset: usize) -> f64 {
        match &self.slots[offset] {
            Some(slot) => slot.target,
            None => MISSING_BAR,
        }
    }

    fn indicator(&self, offset: usize, name: &str) -> f64 {
        match &self.slots[offset] {
            Some(slot) => slot.indicators.get(name).copied().unwrap_or(0.0),
            None => MISSING_BAR,
        }
    }

    fn set(&mut self, offset: usize, name: &str, value: f64) {
        if let Some(slot) = &mut self.slots[offset] {
            slot.indicators.insert(name.to_string(), value);
            if !self.written.contains(name) {
                self.written.insert(name.to_string());
            }
        }
    }
}

/// Runs every configured indicator over each ticker's history
#[derive(Clone)]
pub struct IndicatorEngine {
    indicators: Arc<Vec<Box<dyn Indicator>>>,
}

impl IndicatorEngine {
    pub fn new(indicators: Vec<Box<dyn Indicator>>) -> Self {
        IndicatorEngine {
            indicators: Arc::new(indicators),
        }
    }

    pub fn from_specs(specs: &[IndicatorSpec]) -> Result<Self> {
        Ok(Self::new(build_indicators(specs)?))
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Run all indicators, in order, over one window
    pub fn compute(&self, window: &mut TickerWindow) {
        for indicator in self.indicators.iter() {
            indicator.apply(window);
        }
    }

    /// Recompute indicators for every watched ticker that has data.
    ///
    /// One blocking task per ticker; results are written back after all
    /// tasks finish. Returns the number of tickers processed.
    pub async fn recompute_all(
        &self,
        history: &SharedHistory,
        watchlist: &SymbolSet,
    ) -> Result<usize> {
        if self.is_empty() {
            debug!("No indicators configured, skipping recompute");
            return Ok(0);
        }

        let symbols = watchlist.all().await;
        let windows: Vec<TickerWindow> = {
            let history = history.read().await;
            symbols
                .iter()
                .filter_map(|symbol| {
                    let window = TickerWindow::capture(&history, symbol);
                    if window.is_none() {
                        debug!("No data window for {}, skipping indicators", symbol);
                    }
                    window
                })
                .collect()
        };

        info!(
            "Recomputing {} indicators for {} tickers",
            self.indicators.len(),
            windows.len()
        );

        let handles = windows.into_iter().map(|mut window| {
            let engine = self.clone();
            tokio::task::spawn_blocking(move || {
                engine.compute(&mut window);
                let symbol = window.symbol().to_string();
                (symbol, window.into_updates())
            })
        });

        let results = join_all(handles).await;

        let mut processed = 0;
        let mut first_error = None;
        let mut history = history.write().await;
        for result in results {
            match result {
                Ok((symbol, updates)) => {
                    let mut dropped = 0;
                    for (date, name, value) in &updates {
                        if !history.set_indicator(&symbol, *date, name, *value) {
                            dropped += 1;
                        }
                    }
                    if dropped > 0 {
                        warn!("{} indicator values for {} had no bar to land in", dropped, symbol);
                    }
                    processed += 1;
                }
                Err(e) => {
                    error!("Indicator task failed: {}", e);
                    first_error.get_or_insert(MarketDataError::TaskFailed(e.to_string()));
                }
            }
        }

        info!("Indicators recomputed for {} tickers", processed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(processed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::history::tests::{bar, date};
    use crate::indicators::{Ema, Macd};
    use approx::assert_relative_eq;

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(vec![
            Box::new(Ema::new(2, 3).unwrap()),
            Box::new(Macd::new(2, 3).unwrap()),
        ])
    }

    async fn seeded() -> (SharedHistory, SymbolSet) {
        let history = SharedHistory::new();
        let aapl = (1..=5)
            .map(|d| (date(2024, 1, d), bar(d as f64 * 10.0)))
            .collect();
        history.merge_ticker_bars("AAPL", aapl).await;
        history
            .merge_ticker_bars(
                "MSFT",
                vec![(date(2024, 1, 1), bar(10.0)), (date(2024, 1, 3), bar(20.0))],
            )
            .await;

        let watchlist = SymbolSet::new();
        watchlist.insert(["AAPL", "MSFT"]).await;
        (history, watchlist)
    }

    #[tokio::test]
    async fn test_recompute_writes_values_per_ticker() {
        let (history, watchlist) = seeded().await;
        let processed = engine().recompute_all(&history, &watchlist).await.unwrap();
        assert_eq!(processed, 2);

        let history = history.read().await;
        let ema: Vec<f64> = (1..=5)
            .map(|d| {
                history
                    .bar("AAPL", date(2024, 1, d))
                    .unwrap()
                    .indicator("EMA 2 3")
                    .unwrap()
            })
            .collect();
        for (value, expected) in ema.iter().zip([10.0, 15.0, 20.0, 30.0, 40.0]) {
            assert_relative_eq!(*value, expected, epsilon = 1e-9);
        }

        let day3 = history.bar("AAPL", date(2024, 1, 3)).unwrap();
        assert!(day3.indicator("MACD 2 3").is_none());
        let day4 = history.bar("AAPL", date(2024, 1, 4)).unwrap();
        assert_relative_eq!(day4.indicator("MACD 2 3").unwrap(), 5.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_sparse_ticker_reads_sentinel_and_skips_missing_rows() {
        let (history, watchlist) = seeded().await;
        engine().recompute_all(&history, &watchlist).await.unwrap();

        let history = history.read().await;
        assert!(history.bar("MSFT", date(2024, 1, 2)).is_none());

        let day3 = history.bar("MSFT", date(2024, 1, 3)).unwrap();
        assert_relative_eq!(
            day3.indicator("EMA 2 3").unwrap(),
            (10.0 + MISSING_BAR + 20.0) / 3.0,
            epsilon = 1e-9
        );
    }

    #[tokio::test]
    async fn test_unwatched_and_unknown_tickers_skipped() {
        let (history, _) = seeded().await;
        let watchlist = SymbolSet::new();
        watchlist.insert(["MSFT", "NVDA"]).await;

        let processed = engine().recompute_all(&history, &watchlist).await.unwrap();
        assert_eq!(processed, 1);

        let history = history.read().await;
        let aapl = history.bar("AAPL", date(2024, 1, 1)).unwrap();
        assert!(aapl.indicators.is_empty());
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let (history, watchlist) = seeded().await;
        let engine = engine();

        engine.recompute_all(&history, &watchlist).await.unwrap();
        let first = history.pack().await;
        engine.recompute_all(&history, &watchlist).await.unwrap();

        assert_eq!(history.pack().await, first);
    }

    #[tokio::test]
    async fn test_empty_engine_is_noop() {
        let (history, watchlist) = seeded().await;
        let processed = IndicatorEngine::new(Vec::new())
            .recompute_all(&history, &watchlist)
            .await
            .unwrap();
        assert_eq!(processed, 0);
    }
}
