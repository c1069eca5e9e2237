//! Generation clients: the narrow "instruction in, reply text out" seam
//! between the worker and the external text-generation service.
//!
//! Clients never retry. The worker owns the retry policy and needs to
//! tell "service down" apart from "reply rejected".

pub mod http;
pub mod scripted;

use thiserror::Error;

pub use http::HttpGenerationClient;
pub use scripted::ScriptedGenerationClient;

/// Errors from a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Network failure, timeout, or a non-success status.
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the envelope lacked a usable reply.
    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

/// Sends one instruction to a text-generation service and returns the raw
/// reply text.
pub trait GenerationClient: Send + Sync {
    fn generate(&self, instruction: &str) -> Result<String, GenerationError>;
}
