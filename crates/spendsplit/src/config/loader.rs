use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::has_api_key_source;

/// Upper bound for `stale_job_timeout_secs`: ten years.
pub const MAX_STALE_JOB_TIMEOUT_SECS: u64 = 10 * 365 * 24 * 60 * 60;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }
    if config.queue_capacity == 0 {
        return Err(invalid("queue_capacity must be at least 1"));
    }
    if config.max_attempts == 0 {
        return Err(invalid("max_attempts must be at least 1"));
    }
    if config.stale_job_timeout_secs > MAX_STALE_JOB_TIMEOUT_SECS {
        return Err(invalid(format!(
            "stale_job_timeout_secs must be at most {}, got {}",
            MAX_STALE_JOB_TIMEOUT_SECS, config.stale_job_timeout_secs
        )));
    }

    let generation = &config.generation;
    if !(generation.endpoint.starts_with("http://") || generation.endpoint.starts_with("https://"))
    {
        return Err(invalid(format!(
            "generation.endpoint must be an http(s) URL, got '{}'",
            generation.endpoint
        )));
    }
    if generation.model.trim().is_empty() {
        return Err(invalid("generation.model must not be empty"));
    }
    if generation.timeout_secs == 0 {
        return Err(invalid("generation.timeout_secs must be greater than 0"));
    }
    if let Some(temperature) = generation.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid(format!(
                "generation.temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }
    }
    if !has_api_key_source(generation) {
        log::warn!("No generation API key source configured; requests are sent unauthenticated");
    }

    if config.logging.level.trim().is_empty() {
        return Err(invalid("logging.level must not be empty"));
    }

    Ok(())
}
