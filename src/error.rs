/// Centralized error types for market data ingestion and indicators
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketDataError {
    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider returned {status} when fetching {ticker}")]
    ProviderStatus { ticker: String, status: u16 },

    // Ticker Errors
    #[error("Ticker not found upstream: {0}")]
    TickerNotFound(String),

    // Data Errors
    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Binary snapshot codec failed: {0}")]
    BinaryCodec(#[from] bincode::Error),

    #[error("Cache file corrupt: {0}")]
    CacheCorrupt(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Fan-out Errors
    #[error("Sync failed for {failed} of {total} tickers; first error: {first}")]
    SyncFailed {
        failed: usize,
        total: usize,
        first: Box<MarketDataError>,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, MarketDataError>;

impl MarketDataError {
    /// Check if the caller may retry the failed operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            MarketDataError::HttpError(_)
            | MarketDataError::ProviderStatus { .. }
            | MarketDataError::TaskFailed(_) => true,
            MarketDataError::SyncFailed { first, .. } => first.is_recoverable(),
            _ => false,
        }
    }

    /// Check if the error is a precondition failure that must stop startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MarketDataError::ConfigError(_) | MarketDataError::InvalidParameter(_)
        )
    }

    /// Check if the ticker can never be served by the provider
    pub fn is_ticker_not_found(&self) -> bool {
        match self {
            MarketDataError::TickerNotFound(_) => true,
            MarketDataError::SyncFailed { first, .. } => first.is_ticker_not_found(),
            _ => false,
        }
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            MarketDataError::HttpError(_) => "NET_001",
            MarketDataError::ProviderStatus { .. } => "NET_002",
            MarketDataError::TickerNotFound(_) => "TICKER_001",
            MarketDataError::DeserializationError(_) => "DATA_001",
            MarketDataError::BinaryCodec(_) => "DATA_002",
            MarketDataError::CacheCorrupt(_) => "DATA_003",
            MarketDataError::FileError(_) => "FILE_001",
            MarketDataError::ConfigError(_) => "CFG_001",
            MarketDataError::InvalidParameter(_) => "CFG_002",
            MarketDataError::SyncFailed { .. } => "SYNC_001",
            MarketDataError::TaskFailed(_) => "SYS_001",
        }
    }
}
