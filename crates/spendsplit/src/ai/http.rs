//! Chat-completions client for the remote text-generation service.

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{GenerationClient, GenerationError};
use crate::config::GenerationConfig;

/// Used when the configuration does not override it.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a bookkeeping assistant for a two-person \
household. You split purchases into categorized line items and reply with a single JSON object \
and nothing else.";

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Blocking HTTP client. One `generate` call is exactly one POST; it never
/// retries.
pub struct HttpGenerationClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    system_instruction: String,
    api_key: Option<SecretString>,
}

impl HttpGenerationClient {
    /// Builds a client from configuration and an already-resolved API key.
    pub fn new(
        config: &GenerationConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_instruction: config
                .system_instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            api_key,
        })
    }

    fn headers(&self) -> Result<HeaderMap, GenerationError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                .map_err(|_| {
                    GenerationError::Unavailable("API key is not a valid header value".to_string())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", head)
    }
}

/// Pulls the first choice's content out of a chat-completions body.
fn first_reply(body: &str) -> Result<String, GenerationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("invalid response JSON: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| GenerationError::Malformed("response has no reply content".to_string()))
}

impl GenerationClient for HttpGenerationClient {
    fn generate(&self, instruction: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: instruction,
                },
            ],
            temperature: self.temperature,
        };

        debug!(
            "Sending generation request to {} ({} prompt chars)",
            self.endpoint,
            instruction.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| GenerationError::Unavailable(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!(
                "http status {}: {}",
                status,
                truncate(&body)
            )));
        }

        first_reply(&body)
    }
}
