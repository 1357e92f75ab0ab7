//! Logger setup
//! The level comes from `LoggingConfig` and is fixed once the logger is installed.

use env_logger::{Builder, Env};
use log::{LevelFilter, SetLoggerError};

use crate::config::LoggingConfig;

/// Builds the logger for `config`. `RUST_LOG`, when set, takes precedence.
pub fn builder(config: &LoggingConfig) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(config.level_filter());
    builder.parse_env(Env::default());
    builder
}

/// Installs the global logger. Fails if a logger is already installed.
pub fn init(config: &LoggingConfig) -> Result<LevelFilter, SetLoggerError> {
    builder(config).try_init()?;
    let level = log::max_level();
    log::info!("Logging initialized at {}", level);
    Ok(level)
}
