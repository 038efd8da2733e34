/// Market session and timing utilities
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{MarketDataError, Result};
use crate::types::TradingWindowConfig;

/// Hours during which live quotes are worth polling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingWindow {
    timezone: Tz,
    start_hour: u32,
    end_hour: u32,
    weekdays_only: bool,
}

impl TradingWindow {
    pub fn new(timezone: Tz, start_hour: u32, end_hour: u32, weekdays_only: bool) -> Result<Self> {
        if start_hour > end_hour || end_hour > 23 {
            return Err(MarketDataError::ConfigError(format!(
                "Invalid trading window hours: {}..={}",
                start_hour, end_hour
            )));
        }

        Ok(TradingWindow {
            timezone,
            start_hour,
            end_hour,
            weekdays_only,
        })
    }

    pub fn from_config(config: &TradingWindowConfig) -> Result<Self> {
        let timezone: Tz = config.timezone.parse().map_err(|e| {
            MarketDataError::ConfigError(format!(
                "Invalid trading window timezone '{}': {}",
                config.timezone, e
            ))
        })?;

        Self::new(
            timezone,
            config.start_hour,
            config.end_hour,
            config.weekdays_only,
        )
    }

    /// Check if `now` falls inside the window (end hour inclusive)
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);

        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        let hour = local.hour();
        hour >= self.start_hour && hour <= self.end_hour
    }
}

impl Default for TradingWindow {
    fn default() -> Self {
        TradingWindow {
            timezone: Tz::UTC,
            start_hour: 14,
            end_hour: 21,
            weekdays_only: true,
        }
    }
}
