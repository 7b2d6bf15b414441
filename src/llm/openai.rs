//! OpenAI Chat Completions provider.
//!
//! Works against any server speaking the same wire format (Ollama's
//! `/v1/chat/completions`, vLLM, LM Studio) via `llm.base_url`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    api_key, http_client, parse_http_error, LanguageModel, Message, ModelError, ModelRequest,
    ModelResponse, StopReason, ToolCallRequest,
};
use crate::config::LlmConfig;

const OPENAI_API_URL: &str = "https://api.openai.com";

pub struct OpenAIModel {
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIModel {
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        // Self-hosted compatible servers usually run without a key.
        let api_key = match (&config.base_url, api_key(config, "OPENAI_API_KEY")) {
            (_, Ok(key)) => Some(key),
            (Some(_), Err(_)) => None,
            (None, Err(e)) => return Err(e),
        };
        Ok(Self {
            model: config.model_name().to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API_URL.to_string()),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }

    fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        for message in request.messages {
            push_openai_messages(&mut messages, message);
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": messages,
        });

        if let Some(tools) = request.tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

/// Tool results fan out into one `role: tool` message per call.
fn push_openai_messages(out: &mut Vec<Value>, message: &Message) {
    match message {
        Message::User { content } => out.push(json!({ "role": "user", "content": content })),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut msg = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = json!(tool_calls
                    .iter()
                    .map(|c| json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    }))
                    .collect::<Vec<_>>());
            }
            out.push(msg);
        }
        Message::ToolResults { results } => {
            for r in results {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": r.call_id,
                    "content": r.content,
                }));
            }
        }
    }
}

fn parse_response(response: ChatResponse) -> Result<ModelResponse, ModelError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("no choices in response".to_string()))?;

    let mut tool_calls = Vec::new();
    for call in choice.message.tool_calls.unwrap_or_default() {
        // Arguments arrive as a JSON-encoded string.
        let arguments = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ModelError::InvalidResponse(format!(
                    "tool call '{}' has malformed arguments: {}",
                    call.function.name, e
                ))
            })?
        };
        tool_calls.push(ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments,
        });
    }

    Ok(ModelResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason: choice
            .finish_reason
            .as_deref()
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn),
    })
}

#[async_trait]
impl LanguageModel for OpenAIModel {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, "openai"));
        }

        let parsed: ChatResponse = response.json().await?;
        parse_response(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}
