//! Process-wide logging setup.
//!
//! `log` records from library code are bridged into `tracing`, so the
//! per-job spans opened by the pipeline wrap every line a worker emits.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds the filter: `RUST_LOG` when set, else the configured level.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e))),
    }
}

/// Installs the global subscriber. Call once, before starting workers.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    let filter = env_filter(config)?;
    let result = if config.json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true));
        tracing::subscriber::set_global_default(subscriber)
    };

    result.map_err(|e| ConfigError::Logging(e.to_string()))
}
