//! Per-job categorization: claim, resolve context, generate and validate in
//! a bounded loop, then commit.

pub mod config;
pub mod context;
pub mod error;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use runner::Pipeline;
