pub mod tiingo;

pub use tiingo::{ProviderBar, QuoteRecord, TiingoClient};
