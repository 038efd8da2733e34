/// Sparse (ticker x date) bar grid stored as one date-sorted row sequence
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::{MarketDataError, Result};
use crate::types::{Bar, TickerRange};

/// All tickers' bars for one date
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub date: NaiveDate,
    pub bars: HashMap<String, Bar>,
}

impl Row {
    pub fn new(date: NaiveDate) -> Self {
        Row {
            date,
            bars: HashMap::new(),
        }
    }
}

/// Serializable form of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedRow {
    pub date: NaiveDate,
    pub data: BTreeMap<String, Bar>,
}

/// Serializable form of the whole store, shared by both cache encodings
/// and by clients reading the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackedHistory {
    pub tickers: BTreeMap<String, TickerRange>,
    pub rows: Vec<PackedRow>,
}

impl PackedHistory {
    /// Convert back into a live store, rejecting unsorted or duplicate dates
    pub fn unpack(self) -> Result<History> {
        if let Some(pair) = self.rows.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(MarketDataError::CacheCorrupt(format!(
                "rows out of order: {} then {}",
                pair[0].date, pair[1].date
            )));
        }

        let rows = self
            .rows
            .into_iter()
            .map(|packed| Row {
                date: packed.date,
                bars: packed.data.into_iter().collect(),
            })
            .collect();

        Ok(History {
            tickers: self.tickers.into_iter().collect(),
            rows,
        })
    }
}

/// Greatest row with date <= `date`, or None if every row is later
/// (or there are no rows)
pub fn closest_row_at_or_before(rows: &[Row], date: NaiveDate) -> Option<(usize, &Row)> {
    let count = rows.partition_point(|row| row.date <= date);
    if count == 0 {
        return None;
    }
    Some((count - 1, &rows[count - 1]))
}

/// Time series store: per-ticker ranges plus the ascending row sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    tickers: HashMap<String, TickerRange>,
    rows: Vec<Row>,
}

impl History {
    pub fn new() -> Self {
        History {
            tickers: HashMap::new(),
            // Five years of daily rows
            rows: Vec::with_capacity(365 * 5),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn tickers(&self) -> &HashMap<String, TickerRange> {
        &self.tickers
    }

    pub fn ticker_range(&self, symbol: &str) -> Option<TickerRange> {
        self.tickers.get(symbol).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn closest_row_at_or_before(&self, date: NaiveDate) -> Option<(usize, &Row)> {
        closest_row_at_or_before(&self.rows, date)
    }

    pub fn bar(&self, symbol: &str, date: NaiveDate) -> Option<&Bar> {
        let (_, row) = self.closest_row_at_or_before(date)?;
        if row.date != date {
            return None;
        }
        row.bars.get(symbol)
    }

    /// Inclusive row-index window bounding a ticker's bars
    pub fn ticker_window(&self, symbol: &str) -> Option<(usize, usize)> {
        let range = self.tickers.get(symbol)?;
        let (start, _) = self.closest_row_at_or_before(range.start)?;
        let (end, _) = self.closest_row_at_or_before(range.end)?;
        if start > end {
            return None;
        }
        Some((start, end))
    }

    /// Merge one ticker's bars (ascending by date) into the row sequence.
    ///
    /// Bars for dates that already have a row are stored into it (replacing
    /// any earlier bar for the ticker); other dates get a new row spliced in
    /// at their sorted position. Returns the number of rows created.
    pub fn merge_ticker_bars(&mut self, symbol: &str, mut bars: Vec<(NaiveDate, Bar)>) -> usize {
        if bars.is_empty() {
            debug!("No bars to merge for {}", symbol);
            return 0;
        }

        if !bars.windows(2).all(|w| w[0].0 <= w[1].0) {
            warn!("Bars for {} arrived out of order, sorting before merge", symbol);
            bars.sort_by_key(|(date, _)| *date);
        }

        let first = bars[0].0;
        let last = bars[bars.len() - 1].0;
        let range = TickerRange::new(first, last);
        self.tickers
            .entry(symbol.to_string())
            .and_modify(|existing| existing.extend(range))
            .or_insert(range);

        let mut i = self
            .closest_row_at_or_before(first)
            .map(|(index, _)| index)
            .unwrap_or(0);
        let mut created = 0;

        for (date, bar) in bars {
            while i < self.rows.len() && self.rows[i].date < date {
                i += 1;
            }

            if i == self.rows.len() || self.rows[i].date != date {
                self.rows.insert(i, Row::new(date));
                created += 1;
            }

            self.rows[i].bars.insert(symbol.to_string(), bar);
        }

        debug!(
            "Merged {} into history: range {}..{}, {} new rows, {} total rows",
            symbol,
            first,
            last,
            created,
            self.rows.len()
        );

        created
    }

    /// Store one indicator value; no-op if the ticker has no bar on `date`
    pub fn set_indicator(&mut self, symbol: &str, date: NaiveDate, name: &str, value: f64) -> bool {
        let count = self.rows.partition_point(|row| row.date <= date);
        if count == 0 || self.rows[count - 1].date != date {
            return false;
        }

        match self.rows[count - 1].bars.get_mut(symbol) {
            Some(bar) => {
                bar.indicators.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn pack(&self) -> PackedHistory {
        PackedHistory {
            tickers: self
                .tickers
                .iter()
                .map(|(symbol, range)| (symbol.clone(), *range))
                .collect(),
            rows: self
                .rows
                .iter()
                .map(|row| PackedRow {
                    date: row.date,
                    data: row
                        .bars
                        .iter()
                        .map(|(symbol, bar)| (symbol.clone(), bar.clone()))
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Thread-safe wrapper for History
///
/// Row insertion for new dates reshapes the shared sequence, so every merge
/// holds the write lock for its whole pass; readers share the read lock.
#[derive(Clone, Default)]
pub struct SharedHistory {
    inner: Arc<RwLock<History>>,
}

impl SharedHistory {
    pub fn new() -> Self {
        SharedHistory {
            inner: Arc::new(RwLock::new(History::new())),
        }
    }

    pub fn from_history(history: History) -> Self {
        SharedHistory {
            inner: Arc::new(RwLock::new(history)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, History> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, History> {
        self.inner.write().await
    }

    pub async fn merge_ticker_bars(&self, symbol: &str, bars: Vec<(NaiveDate, Bar)>) -> usize {
        let mut history = self.inner.write().await;
        history.merge_ticker_bars(symbol, bars)
    }

    pub async fn closest_row_at_or_before(&self, date: NaiveDate) -> Option<(usize, Row)> {
        let history = self.inner.read().await;
        history
            .closest_row_at_or_before(date)
            .map(|(index, row)| (index, row.clone()))
    }

    pub async fn ticker_range(&self, symbol: &str) -> Option<TickerRange> {
        self.inner.read().await.ticker_range(symbol)
    }

    pub async fn has_ticker(&self, symbol: &str) -> bool {
        self.inner.read().await.tickers.contains_key(symbol)
    }

    pub async fn row_count(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn pack(&self) -> PackedHistory {
        self.inner.read().await.pack()
    }

    /// Swap in a freshly loaded store, returning the previous row count
    pub async fn replace(&self, history: History) -> usize {
        let mut current = self.inner.write().await;
        let previous = current.rows.len();
        *current = history;
        previous
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn bar(adj_close: f64) -> Bar {
        Bar {
            open: adj_close,
            high: adj_close + 1.0,
            low: adj_close - 1.0,
            close: adj_close,
            volume: 1_000,
            adj_open: adj_close,
            adj_high: adj_close + 1.0,
            adj_low: adj_close - 1.0,
            adj_close,
            adj_volume: 1_000,
            div_cash: 0.0,
            split_factor: 1.0,
            indicators: BTreeMap::new(),
        }
    }

    fn dates(history: &History) -> Vec<NaiveDate> {
        history.rows().iter().map(|r| r.date).collect()
    }

    #[test]
    fn test_closest_row_empty() {
        assert!(closest_row_at_or_before(&[], date(2024, 1, 1)).is_none());
    }

    #[test]
    fn test_closest_row_exact_between_and_before() {
        let rows: Vec<Row> = [2, 4, 8].iter().map(|d| Row::new(date(2024, 1, *d))).collect();

        assert_eq!(closest_row_at_or_before(&rows, date(2024, 1, 4)).unwrap().0, 1);
        assert_eq!(closest_row_at_or_before(&rows, date(2024, 1, 7)).unwrap().0, 1);
        assert_eq!(closest_row_at_or_before(&rows, date(2024, 3, 1)).unwrap().0, 2);
        assert!(closest_row_at_or_before(&rows, date(2024, 1, 1)).is_none());
    }

    #[test]
    fn test_merge_into_empty() {
        let mut history = History::new();
        let created = history.merge_ticker_bars(
            "AAPL",
            vec![(date(2024, 1, 2), bar(10.0)), (date(2024, 1, 3), bar(11.0))],
        );

        assert_eq!(created, 2);
        assert_eq!(dates(&history), vec![date(2024, 1, 2), date(2024, 1, 3)]);
        assert_eq!(
            history.ticker_range("AAPL"),
            Some(TickerRange::new(date(2024, 1, 2), date(2024, 1, 3)))
        );
    }

    #[test]
    fn test_merge_interleaves_sparse_tickers() {
        let mut history = History::new();
        history.merge_ticker_bars(
            "AAPL",
            vec![
                (date(2024, 1, 2), bar(10.0)),
                (date(2024, 1, 4), bar(11.0)),
                (date(2024, 1, 8), bar(12.0)),
            ],
        );

        // Starts before every row, lands on one existing date and fills gaps
        let created = history.merge_ticker_bars(
            "MSFT",
            vec![
                (date(2024, 1, 1), bar(20.0)),
                (date(2024, 1, 3), bar(21.0)),
                (date(2024, 1, 4), bar(22.0)),
                (date(2024, 1, 9), bar(23.0)),
            ],
        );

        assert_eq!(created, 3);
        assert_eq!(
            dates(&history),
            vec![
                date(2024, 1, 1),
                date(2024, 1, 2),
                date(2024, 1, 3),
                date(2024, 1, 4),
                date(2024, 1, 8),
                date(2024, 1, 9),
            ]
        );

        let row = &history.rows()[3];
        assert_eq!(row.bars["AAPL"].adj_close, 11.0);
        assert_eq!(row.bars["MSFT"].adj_close, 22.0);
        assert!(history.bar("MSFT", date(2024, 1, 2)).is_none());
        assert_eq!(history.bar("MSFT", date(2024, 1, 3)).unwrap().adj_close, 21.0);
    }

    #[test]
    fn test_merge_gap_inside_existing_rows() {
        let mut history = History::new();
        history.merge_ticker_bars(
            "SPY",
            vec![(date(2024, 1, 1), bar(1.0)), (date(2024, 1, 10), bar(2.0))],
        );
        history.merge_ticker_bars(
            "QQQ",
            vec![(date(2024, 1, 5), bar(3.0)), (date(2024, 1, 10), bar(4.0))],
        );

        assert_eq!(
            dates(&history),
            vec![date(2024, 1, 1), date(2024, 1, 5), date(2024, 1, 10)]
        );
        assert!(history.rows()[1].bars.get("SPY").is_none());
        assert_eq!(history.rows()[1].bars["QQQ"].adj_close, 3.0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let bars = vec![
            (date(2024, 2, 1), bar(1.0)),
            (date(2024, 2, 2), bar(2.0)),
            (date(2024, 2, 5), bar(3.0)),
        ];
        let mut once = History::new();
        once.merge_ticker_bars("IBM", vec![(date(2024, 2, 3), bar(9.0))]);
        let mut twice = once.clone();

        once.merge_ticker_bars("AAPL", bars.clone());
        twice.merge_ticker_bars("AAPL", bars.clone());
        twice.merge_ticker_bars("AAPL", bars);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_replaces_bar_and_resets_indicators() {
        let mut history = History::new();
        history.merge_ticker_bars("AAPL", vec![(date(2024, 1, 2), bar(10.0))]);
        assert!(history.set_indicator("AAPL", date(2024, 1, 2), "EMA 2 3", 10.0));

        history.merge_ticker_bars("AAPL", vec![(date(2024, 1, 2), bar(12.0))]);

        let stored = history.bar("AAPL", date(2024, 1, 2)).unwrap();
        assert_eq!(stored.adj_close, 12.0);
        assert!(stored.indicators.is_empty());
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut history = History::new();
        assert_eq!(history.merge_ticker_bars("AAPL", Vec::new()), 0);
        assert!(history.is_empty());
        assert!(history.ticker_range("AAPL").is_none());
    }

    #[test]
    fn test_merge_sorts_unordered_input() {
        let mut history = History::new();
        history.merge_ticker_bars(
            "AAPL",
            vec![(date(2024, 1, 3), bar(2.0)), (date(2024, 1, 2), bar(1.0))],
        );
        assert_eq!(dates(&history), vec![date(2024, 1, 2), date(2024, 1, 3)]);
    }

    #[test]
    fn test_range_widens_never_shrinks() {
        let mut history = History::new();
        history.merge_ticker_bars(
            "AAPL",
            vec![(date(2024, 1, 1), bar(1.0)), (date(2024, 3, 1), bar(2.0))],
        );
        history.merge_ticker_bars("AAPL", vec![(date(2024, 2, 1), bar(1.5))]);

        assert_eq!(
            history.ticker_range("AAPL"),
            Some(TickerRange::new(date(2024, 1, 1), date(2024, 3, 1)))
        );
    }

    #[test]
    fn test_ticker_window() {
        let mut history = History::new();
        history.merge_ticker_bars("A", vec![(date(2024, 1, 1), bar(1.0))]);
        history.merge_ticker_bars(
            "B",
            vec![(date(2024, 1, 2), bar(1.0)), (date(2024, 1, 4), bar(1.0))],
        );
        history.merge_ticker_bars("A", vec![(date(2024, 1, 5), bar(1.0))]);

        assert_eq!(history.ticker_window("B"), Some((1, 2)));
        assert_eq!(history.ticker_window("A"), Some((0, 3)));
        assert_eq!(history.ticker_window("C"), None);
    }

    #[test]
    fn test_set_indicator_missing_bar() {
        let mut history = History::new();
        history.merge_ticker_bars("A", vec![(date(2024, 1, 1), bar(1.0))]);

        assert!(!history.set_indicator("B", date(2024, 1, 1), "X", 1.0));
        assert!(!history.set_indicator("A", date(2023, 1, 1), "X", 1.0));
        assert!(history.set_indicator("A", date(2024, 1, 1), "X", 1.0));
        assert_eq!(history.bar("A", date(2024, 1, 1)).unwrap().indicator("X"), Some(1.0));
    }

    #[test]
    fn test_pack_unpack_lossless() {
        let mut history = History::new();
        history.merge_ticker_bars(
            "AAPL",
            vec![(date(2024, 1, 2), bar(10.0)), (date(2024, 1, 3), bar(11.0))],
        );
        history.merge_ticker_bars("MSFT", vec![(date(2024, 1, 3), bar(20.0))]);
        history.set_indicator("AAPL", date(2024, 1, 3), "EMA 2 12", 10.5);

        let restored = history.pack().unpack().unwrap();
        assert_eq!(restored, history);
    }

    #[test]
    fn test_unpack_rejects_unsorted_rows() {
        let packed = PackedHistory {
            tickers: BTreeMap::new(),
            rows: vec![
                PackedRow {
                    date: date(2024, 1, 3),
                    data: BTreeMap::new(),
                },
                PackedRow {
                    date: date(2024, 1, 3),
                    data: BTreeMap::new(),
                },
            ],
        };
        assert!(matches!(
            packed.unpack(),
            Err(MarketDataError::CacheCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_shared_history_concurrent_merges() {
        let shared = SharedHistory::new();
        let mut handles = Vec::new();

        for t in 0..8u32 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let bars = (0..20u32)
                    .map(|d| (date(2024, 1, 1) + chrono::Days::new((d * 3 + t) as u64), bar(d as f64)))
                    .collect();
                shared.merge_ticker_bars(&format!("T{}", t), bars).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = shared.read().await;
        assert!(history.rows().windows(2).all(|w| w[0].date < w[1].date));
        for t in 0..8 {
            assert!(history.ticker_range(&format!("T{}", t)).is_some());
        }
        let stored: usize = history.rows().iter().map(|r| r.bars.len()).sum();
        assert_eq!(stored, 8 * 20);
    }

    proptest! {
        #[test]
        fn prop_closest_matches_linear_scan(
            days in proptest::collection::btree_set(0u64..400, 0..60),
            query in 0u64..420,
        ) {
            let base = date(2020, 1, 1);
            let rows: Vec<Row> = days
                .iter()
                .map(|d| Row::new(base + chrono::Days::new(*d)))
                .collect();
            let target = base + chrono::Days::new(query);

            let expected = rows.iter().rposition(|r| r.date <= target);
            let actual = closest_row_at_or_before(&rows, target).map(|(i, _)| i);
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_merge_keeps_rows_sorted(
            batches in proptest::collection::vec(
                proptest::collection::btree_set(0u64..120, 0..25),
                1..6,
            )
        ) {
            let base = date(2022, 1, 1);
            let mut history = History::new();
            for (t, days) in batches.iter().enumerate() {
                let bars = days
                    .iter()
                    .map(|d| (base + chrono::Days::new(*d), bar(*d as f64)))
                    .collect();
                history.merge_ticker_bars(&format!("T{}", t), bars);
            }

            prop_assert!(history.rows().windows(2).all(|w| w[0].date < w[1].date));
            for (t, days) in batches.iter().enumerate() {
                let symbol = format!("T{}", t);
                for d in days {
                    let stored = history.bar(&symbol, base + chrono::Days::new(*d));
                    prop_assert_eq!(stored.map(|b| b.adj_close), Some(*d as f64));
                }
            }
        }
    }
}
