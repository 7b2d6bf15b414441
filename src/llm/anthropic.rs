//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    api_key, http_client, parse_http_error, LanguageModel, Message, ModelError, ModelRequest,
    ModelResponse, StopReason, ToolCallRequest, ToolSpec,
};
use crate::config::LlmConfig;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicModel {
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        Ok(Self {
            model: config.model_name().to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            api_key: api_key(config, "ANTHROPIC_API_KEY")?,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }

    fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system,
            "messages": request.messages.iter().map(message_to_claude).collect::<Vec<_>>(),
        });

        if let Some(tools) = request.tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools.iter().map(tool_to_claude).collect::<Vec<_>>());
            body["tool_choice"] = json!({ "type": "auto" });
        }

        body
    }
}

fn message_to_claude(message: &Message) -> Value {
    match message {
        Message::User { content } => json!({ "role": "user", "content": content }),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut blocks = Vec::new();
            if !content.is_empty() {
                blocks.push(json!({ "type": "text", "text": content }));
            }
            for call in tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
        Message::ToolResults { results } => {
            let blocks: Vec<Value> = results
                .iter()
                .map(|r| {
                    let mut block = json!({
                        "type": "tool_result",
                        "tool_use_id": r.call_id,
                        "content": r.content,
                    });
                    if r.is_error {
                        block["is_error"] = json!(true);
                    }
                    block
                })
                .collect();
            json!({ "role": "user", "content": blocks })
        }
    }
}

fn tool_to_claude(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn parse_response(response: ClaudeResponse) -> ModelResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Other => {}
        }
    }

    ModelResponse {
        text,
        tool_calls,
        stop_reason: response
            .stop_reason
            .as_deref()
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn),
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, "anthropic"));
        }

        let parsed: ClaudeResponse = response.json().await?;
        Ok(parse_response(parsed))
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolResultEntry;

    fn model() -> AnthropicModel {
        AnthropicModel {
            model: "claude-test".into(),
            base_url: ANTHROPIC_API_URL.into(),
            api_key: "test-key".into(),
            max_tokens: 800,
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_request_body_omits_tools_when_withheld() {
        let messages = vec![Message::user("hi")];
        let specs = vec![ToolSpec {
            name: "search_course_content".into(),
            description: "Search".into(),
            parameters: json!({ "type": "object" }),
        }];

        let with_tools = model().build_request_body(&ModelRequest {
            system: "sys",
            messages: &messages,
            tools: Some(&specs),
        });
        assert_eq!(with_tools["tools"][0]["name"], "search_course_content");
        assert_eq!(with_tools["tool_choice"]["type"], "auto");
        assert_eq!(with_tools["max_tokens"], 800);

        let without = model().build_request_body(&ModelRequest {
            system: "sys",
            messages: &messages,
            tools: None,
        });
        assert!(without.get("tools").is_none());
        assert!(without.get("tool_choice").is_none());
    }

    #[test]
    fn test_tool_results_become_user_blocks() {
        let msg = Message::ToolResults {
            results: vec![ToolResultEntry {
                call_id: "toolu_1".into(),
                content: "Tool execution error: boom".into(),
                is_error: true,
            }],
        };
        let v = message_to_claude(&msg);
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"][0]["type"], "tool_result");
        assert_eq!(v["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(v["content"][0]["is_error"], true);
    }

    #[test]
    fn test_parse_tool_use_response() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "Let me search." },
                { "type": "tool_use", "id": "toolu_1", "name": "search_course_content",
                  "input": { "query": "variables" } }
            ],
            "stop_reason": "tool_use"
        });
        let parsed: ClaudeResponse = serde_json::from_value(raw).unwrap();
        let response = parse_response(parsed);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.text, "Let me search.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["query"], "variables");
    }
}
