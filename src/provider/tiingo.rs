/// Tiingo REST client for live quotes and daily history
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::types::{Bar, ProviderConfig};

/// One entry of the batched quote response
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRecord {
    pub ticker: String,
    #[serde(rename = "tngoLast", alias = "lastPrice", default)]
    pub last_price: Option<f64>,
}

/// One daily bar as returned by the history endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBar {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub adj_open: f64,
    pub adj_high: f64,
    pub adj_low: f64,
    pub adj_close: f64,
    pub adj_volume: i64,
    #[serde(default)]
    pub div_cash: f64,
    #[serde(default = "default_split_factor")]
    pub split_factor: f64,
}

fn default_split_factor() -> f64 {
    1.0
}

impl ProviderBar {
    /// Normalize into the calendar date and stored bar
    pub fn into_dated_bar(self) -> (NaiveDate, Bar) {
        (
            self.date.date_naive(),
            Bar {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
                adj_open: self.adj_open,
                adj_high: self.adj_high,
                adj_low: self.adj_low,
                adj_close: self.adj_close,
                adj_volume: self.adj_volume,
                div_cash: self.div_cash,
                split_factor: self.split_factor,
                indicators: BTreeMap::new(),
            },
        )
    }
}

/// Market data provider client
///
/// Cloneable; clones share the underlying connection pool.
#[derive(Clone)]
pub struct TiingoClient {
    client: Client,
    base_url: String,
    token: String,
    history_start: String,
    resample_freq: String,
}

impl TiingoClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_sec))
            .build()?;

        Ok(TiingoClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            history_start: config.history_start.clone(),
            resample_freq: config.resample_freq.clone(),
        })
    }

    /// Latest traded price for every ticker in one request.
    ///
    /// Tickers the provider does not know are simply absent from the result.
    pub async fn fetch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, f64>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = tickers.join(",");
        let url = format!(
            "{}/iex/?tickers={}&token={}",
            self.base_url, joined, self.token
        );

        debug!("Fetching quotes for {} tickers", tickers.len());

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Quote request returned {} for {}", status, joined);
            return Err(MarketDataError::ProviderStatus {
                ticker: joined,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let records: Vec<QuoteRecord> = serde_json::from_str(&body)?;

        let quotes: HashMap<String, f64> = records
            .into_iter()
            .filter_map(|record| {
                record
                    .last_price
                    .map(|price| (record.ticker.to_uppercase(), price))
            })
            .collect();

        debug!("Received {} of {} quotes", quotes.len(), tickers.len());
        Ok(quotes)
    }

    /// Full daily history for one ticker since the configured epoch start
    pub async fn fetch_daily_history(&self, ticker: &str) -> Result<Vec<ProviderBar>> {
        let url = format!(
            "{}/tiingo/daily/{}/prices?startDate={}&resampleFreq={}&format=json&token={}",
            self.base_url, ticker, self.history_start, self.resample_freq, self.token
        );

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!("{} not found upstream", ticker);
            return Err(MarketDataError::TickerNotFound(ticker.to_string()));
        }
        if !status.is_success() {
            return Err(MarketDataError::ProviderStatus {
                ticker: ticker.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let bars: Vec<ProviderBar> = serde_json::from_str(&body)?;

        info!("Fetched {} daily bars for {}", bars.len(), ticker);
        Ok(bars)
    }
}
