pub mod ai;
pub mod categorizer;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod secrets;
pub mod service;
pub mod worker;

pub use ai::{GenerationClient, GenerationError, HttpGenerationClient, ScriptedGenerationClient};
pub use categorizer::{AttributionMode, CategorizationResult, Category, LineItem, Rejection};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, Result, SpendsplitError, SubmissionError, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use secrets::{resolve_api_key, SecretError};
pub use service::{CategorizationService, JobReport, RecoveryReport, ServiceSettings, SubmitRequest};
pub use worker::{Job, JobOutcome, JobStatus, WorkerPool};
