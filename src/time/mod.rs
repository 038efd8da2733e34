pub mod session;

pub use session::TradingWindow;
