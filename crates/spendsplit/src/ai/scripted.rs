//! Scripted stand-in for the generation service, for deterministic tests.
//!
//! Replies are served FIFO from a queue of canned results. An optional
//! responder function takes over once the queue is empty. All state sits
//! behind a mutex so concurrent workers can share one instance.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{GenerationClient, GenerationError};

type Responder = Box<dyn Fn(&str) -> Result<String, GenerationError> + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Result<String, GenerationError>>,
    prompts: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedGenerationClient {
    state: Mutex<ScriptState>,
    responder: Option<Responder>,
}

impl ScriptedGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every call is answered by `responder` (after any
    /// queued replies are used up).
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(ScriptState::default()),
            responder: Some(Box::new(responder)),
        }
    }

    /// Queues a successful reply.
    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.push(Ok(reply.into()))
    }

    /// Queues a failure.
    pub fn push_error(&self, error: GenerationError) -> &Self {
        self.push(Err(error))
    }

    pub fn push(&self, result: Result<String, GenerationError>) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state.queue.push_back(result);
        }
        self
    }

    /// Number of `generate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|s| s.prompts.len()).unwrap_or(0)
    }

    /// Every instruction received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.prompts.clone())
            .unwrap_or_default()
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }
}

impl GenerationClient for ScriptedGenerationClient {
    fn generate(&self, instruction: &str) -> Result<String, GenerationError> {
        let queued = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| GenerationError::Unavailable("script state poisoned".to_string()))?;
            state.prompts.push(instruction.to_string());
            state.queue.pop_front()
        };

        match (queued, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(instruction),
            (None, None) => Err(GenerationError::Unavailable(
                "no scripted reply left".to_string(),
            )),
        }
    }
}
