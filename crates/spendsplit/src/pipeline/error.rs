use thiserror::Error;

use crate::ai::GenerationError;
use crate::categorizer::Rejection;
use crate::db::spending_repo::CommitError;
use crate::db::DatabaseError;

/// Why a job ended in `failed`. The `Display` text is what gets stored on
/// the job record.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Reply rejected {attempts} times; last rejection: {last}")]
    RetriesExhausted { attempts: u32, last: Rejection },

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] CommitError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
