use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpendsplitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Submission rejected: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Generation client error: {0}")]
    Generation(#[from] crate::ai::GenerationError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

/// Reasons a submission or a follow-up request is refused before any job
/// processing happens.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(rust_decimal::Decimal),

    #[error("Purchase description must not be empty")]
    EmptyDescription,

    #[error("Unknown user {0}")]
    UnknownUser(i64),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{id}' is {status} and cannot be resubmitted")]
    NotResubmittable { id: String, status: String },
}

pub type Result<T> = std::result::Result<T, SpendsplitError>;
