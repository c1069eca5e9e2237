use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::expand_home;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; defaults to `~/.spendsplit/data/spendsplit.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Generation attempts per job before it is failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Jobs left in `processing` longer than this are failed at startup.
    #[serde(default = "default_stale_job_timeout")]
    pub stale_job_timeout_secs: u64,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stale_job_timeout() -> u64 {
    900
}

impl Config {
    /// Resolved database location, with `~` expanded.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) if !path.is_empty() => Some(expand_home(path)),
            _ => crate::db::default_database_path(),
        }
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_job_timeout_secs)
    }
}

/// Text-generation service settings. The API key comes from the first
/// configured source: `api_key`, then `api_key_file`, then `api_key_env_var`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Chat-completions endpoint URL.
    pub endpoint: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Replaces the built-in system instruction when set.
    #[serde(default)]
    pub system_instruction: Option<String>,
}

fn default_generation_timeout() -> u64 {
    60
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
