pub mod loader;

pub use loader::{load_config, parse_config, TOKEN_ENV_VAR};
