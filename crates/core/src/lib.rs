//! # ordinal-core
//!
//! Environment configuration and logging setup shared by the ordinal crates.

pub mod config;
pub mod logging;

pub use config::{AppConfig, AppConfigTrait, ConfigError, ConfigSource, Environment, LogFormat, PoolSettings};
pub use logging::{init_logging, mask_database_url, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
