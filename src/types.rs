/// Core type definitions for the market data store
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One ticker's daily bar, stored in exactly one (date, ticker) cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
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
    pub div_cash: f64,
    pub split_factor: f64,
    /// Computed indicator values keyed by indicator name
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl Bar {
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }
}

/// First and last date a ticker has data for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerRange {
    #[serde(rename = "dataStart")]
    pub start: NaiveDate,
    #[serde(rename = "dataEnd")]
    pub end: NaiveDate,
}

impl TickerRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        TickerRange { start, end }
    }

    /// Widen this range to cover another; never shrinks
    pub fn extend(&mut self, other: TickerRange) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }
}

/// Indicator configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndicatorSpec {
    Ema { smoothing: u32, period: usize },
    Macd { short_period: usize, long_period: usize },
    Sma { period: usize },
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Tickers added to the watchlist at startup
    #[serde(default)]
    pub watchlist: Vec<String>,

    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_token: String,
    /// Epoch start date for full-history requests (YYYY-MM-DD)
    pub history_start: String,
    pub resample_freq: String,
    pub request_timeout_sec: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://api.tiingo.com".to_string(),
            api_token: String::new(),
            history_start: "1900-01-01".to_string(),
            resample_freq: "daily".to_string(),
            request_timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    pub binary_file: String,
    pub json_file: String,
    /// Load the JSON snapshot instead of the binary one
    pub prefer_json: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: "./data".to_string(),
            binary_file: "dailycache.bin".to_string(),
            json_file: "dailycache.json".to_string(),
            prefer_json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub quote_refresh_interval_sec: u64,
    pub history_refresh_interval_sec: u64,
    pub trading_window: TradingWindowConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            quote_refresh_interval_sec: 300,
            history_refresh_interval_sec: 86_400,
            trading_window: TradingWindowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingWindowConfig {
    pub timezone: String,
    pub start_hour: u32,
    /// Inclusive: the whole `end_hour` hour is inside the window
    pub end_hour: u32,
    pub weekdays_only: bool,
}

impl Default for TradingWindowConfig {
    fn default() -> Self {
        TradingWindowConfig {
            timezone: "UTC".to_string(),
            start_hour: 14,
            end_hour: 21,
            weekdays_only: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_format: default_log_format(),
            watchlist: Vec::new(),
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            schedule: ScheduleConfig::default(),
            indicators: Vec::new(),
        }
    }
}
