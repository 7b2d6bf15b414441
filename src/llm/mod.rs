//! Language model abstraction.
//!
//! The orchestration loop talks to a model through [`LanguageModel`]: a
//! system prompt, a transcript of [`Message`]s, and optionally a list of
//! [`ToolSpec`]s in; either answer text or a batch of tool calls out.
//!
//! Providers:
//! - [`anthropic::AnthropicModel`]: Anthropic Messages API.
//! - [`openai::OpenAIModel`]: OpenAI Chat Completions, also usable with
//!   Ollama and other compatible servers via `llm.base_url`.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

/// Tool description advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the tool's arguments.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call ID, echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The output of one tool call, tagged with the originating call ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultEntry {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResults {
        results: Vec<ToolResultEntry>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "end_turn" | "stop" | "stop_sequence" => StopReason::EndTurn,
            "tool_use" | "tool_calls" => StopReason::ToolUse,
            "max_tokens" | "length" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// One model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
        }
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Everything a provider needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    /// `None` means the model must answer without tools.
    pub tools: Option<&'a [ToolSpec]>,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Map an HTTP failure to a [`ModelError`].
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> ModelError {
    match status {
        401 => ModelError::Authentication(format!("{}: Invalid API key", provider)),
        403 => ModelError::Authentication(format!("{}: Access denied", provider)),
        429 => ModelError::RateLimited(body.to_string()),
        400 | 404 | 422 => ModelError::InvalidRequest(body.to_string()),
        _ => ModelError::Server {
            status,
            message: body.to_string(),
        },
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ModelError::InvalidResponse(e.to_string())
        } else {
            ModelError::Network(e.to_string())
        }
    }
}

/// A chat model that may request tool calls.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider identifier (e.g. `"anthropic"`).
    fn name(&self) -> &str;
    /// Model identifier sent to the provider.
    fn model(&self) -> &str;
    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError>;
}

fn api_key(config: &LlmConfig, default_env: &str) -> Result<String, ModelError> {
    let var = config.api_key_env.as_deref().unwrap_or(default_env);
    std::env::var(var)
        .map_err(|_| ModelError::Authentication(format!("{} environment variable not set", var)))
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(ModelError::from)
}

/// Create the [`LanguageModel`] named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(anthropic::AnthropicModel::new(config)?)),
        "openai" => Ok(Box::new(openai::OpenAIModel::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
