/// Configuration loading from TOML file
use chrono::NaiveDate;
use std::path::Path;

use crate::error::{MarketDataError, Result};
use crate::indicators::build_indicators;
use crate::time::TradingWindow;
use crate::types::Config;

/// Environment variable that overrides `provider.api_token`
pub const TOKEN_ENV_VAR: &str = "TIINGO_TOKEN";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MarketDataError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let mut config = parse_config(&content)?;

    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        if !token.is_empty() {
            config.provider.api_token = token;
        }
    }

    Ok(config)
}

/// Parse and validate config text
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content)
        .map_err(|e| MarketDataError::ConfigError(format!("Failed to parse config: {}", e)))?;

    config.watchlist = config
        .watchlist
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.provider.base_url.is_empty() {
        return Err(MarketDataError::ConfigError("provider.base_url is empty".to_string()));
    }

    NaiveDate::parse_from_str(&config.provider.history_start, "%Y-%m-%d").map_err(|e| {
        MarketDataError::ConfigError(format!(
            "Invalid provider.history_start '{}': {}",
            config.provider.history_start, e
        ))
    })?;

    if config.provider.resample_freq.is_empty() {
        return Err(MarketDataError::ConfigError("provider.resample_freq is empty".to_string()));
    }

    if config.cache.binary_file.is_empty() || config.cache.json_file.is_empty() {
        return Err(MarketDataError::ConfigError("cache file names must be set".to_string()));
    }

    if config.cache.binary_file == config.cache.json_file {
        return Err(MarketDataError::ConfigError(
            "cache.binary_file and cache.json_file must differ".to_string(),
        ));
    }

    if config.schedule.quote_refresh_interval_sec == 0
        || config.schedule.history_refresh_interval_sec == 0
    {
        return Err(MarketDataError::ConfigError(
            "schedule intervals must be > 0".to_string(),
        ));
    }

    TradingWindow::from_config(&config.schedule.trading_window)?;

    // MACD short >= long and zero periods surface here, before any computation
    build_indicators(&config.indicators)?;

    Ok(())
}
