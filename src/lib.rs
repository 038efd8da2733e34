pub mod types;
pub mod error;
pub mod config;
pub mod utils;
pub mod time;
pub mod data;
pub mod provider;
pub mod indicators;
pub mod scheduler;

pub use types::*;
pub use error::{MarketDataError, Result};
