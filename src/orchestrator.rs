//! Bounded multi-round tool orchestration.
//!
//! One call to [`Orchestrator::run`] answers one question:
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   AWAITING_MODEL ──▶ MODEL_REQUESTS_TOOL ──▶ EXECUTING_TOOL
//!            │
//!            └──────▶ MODEL_FINAL ──▶ TERMINAL
//! ```
//!
//! Tools are offered to the model only while `rounds_used < max_rounds`.
//! After that the model is called once more without tools and whatever
//! it says is the answer, so a query makes at most `max_rounds + 1` model
//! calls. Every tool call in a round is executed, in order, before the
//! next model call.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, LlmConfig};
use crate::error::RagError;
use crate::llm::{LanguageModel, Message, ModelError, ModelRequest, ToolResultEntry};
use crate::models::Source;
use crate::traits::{ToolContext, ToolInvocation, ToolRegistry};

/// Built-in system instructions. `{max_rounds}` is substituted at start-up.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an assistant for questions about course materials, with tools to search them.

Tools:
- search_course_content: find specific content in course lessons. Course names may be partial; lesson numbers narrow the search.
- get_course_outline: a course's title, link, instructor and numbered lesson list.
- knowledge_stats: what the knowledge base currently holds.

Guidelines:
- Use get_course_outline for questions about course structure or lesson lists. Include the course title, course link and every lesson number and title in the answer.
- Use search_course_content for questions about specific topics or concepts.
- You may use tools in up to {max_rounds} sequential rounds. Use earlier results to refine later searches.
- Answer general knowledge questions directly without tools.
- If a tool finds nothing, say so plainly.
- Give the answer only. Do not describe your reasoning, the tools, or the search results.

Keep answers brief, accurate and educational, with an example when it helps.";

/// One executed tool call, kept for inspection and CLI output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRound {
    /// Zero-based round the call belonged to.
    pub round_index: usize,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub observation: String,
    pub error: Option<String>,
}

/// Result of a completed [`Orchestrator::run`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub rounds: Vec<ToolCallRound>,
    pub model_calls: usize,
}

impl QueryOutcome {
    /// Number of tool rounds used.
    pub fn rounds_used(&self) -> usize {
        self.rounds
            .iter()
            .map(|r| r.round_index + 1)
            .max()
            .unwrap_or(0)
    }
}

pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    max_rounds: usize,
    merge_sources: bool,
    system_prompt: String,
    model_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
        ctx: ToolContext,
        agent: &AgentConfig,
        llm: &LlmConfig,
    ) -> Self {
        let template = agent
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Self {
            model,
            registry,
            ctx,
            max_rounds: agent.max_rounds,
            merge_sources: agent.merge_sources,
            system_prompt: template.replace("{max_rounds}", &agent.max_rounds.to_string()),
            model_timeout: Duration::from_secs(llm.timeout_secs),
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// System text for one query, with prior conversation appended.
    pub fn system_text(&self, history: Option<&str>) -> String {
        match history.filter(|h| !h.trim().is_empty()) {
            Some(h) => format!("{}\n\nPrevious conversation:\n{}", self.system_prompt, h),
            None => self.system_prompt.clone(),
        }
    }

    /// Answer `question`, calling tools as the model asks.
    ///
    /// Cancellation is honoured before every model call and while one is
    /// in flight. Model failures end the query; tool failures become
    /// observations and the query continues.
    pub async fn run(
        &self,
        question: &str,
        history: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, RagError> {
        let system = self.system_text(history);
        let specs = self.registry.tool_specs();
        let mut invocation = ToolInvocation::new(&self.registry, &self.ctx);

        let mut messages = vec![Message::user(question)];
        let mut rounds: Vec<ToolCallRound> = Vec::new();
        let mut rounds_used = 0usize;
        let mut model_calls = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }

            let tools_offered = rounds_used < self.max_rounds && !specs.is_empty();
            let request = ModelRequest {
                system: &system,
                messages: &messages,
                tools: tools_offered.then_some(specs.as_slice()),
            };

            debug!(round = rounds_used, tools_offered, "invoking model");
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                r = tokio::time::timeout(self.model_timeout, self.model.invoke(request)) => r,
            };
            model_calls += 1;

            let response = match response {
                Ok(r) => r?,
                Err(_) => return Err(ModelError::Timeout(self.model_timeout).into()),
            };

            if !response.wants_tools() || !tools_offered {
                if response.wants_tools() {
                    warn!(
                        calls = response.tool_calls.len(),
                        "model requested tools after the round budget was spent; ignoring"
                    );
                }
                let answer = response.text.trim();
                if answer.is_empty() {
                    return Err(RagError::EmptyAnswer);
                }

                let sources = if self.merge_sources {
                    invocation.all_sources().to_vec()
                } else {
                    invocation.last_sources().to_vec()
                };
                info!(
                    rounds = rounds_used,
                    model_calls,
                    sources = sources.len(),
                    "query completed"
                );
                return Ok(QueryOutcome {
                    answer: answer.to_string(),
                    sources,
                    rounds,
                    model_calls,
                });
            }

            debug!(
                round = rounds_used,
                calls = response.tool_calls.len(),
                "model requested tools"
            );
            messages.push(Message::Assistant {
                content: response.text.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in response.tool_calls {
                let (observation, error) =
                    match invocation.execute(&call.name, call.arguments.clone()).await {
                        Ok(out) if out.is_error => (out.text.clone(), Some(out.text)),
                        Ok(out) => (out.text, None),
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "tool call rejected");
                            let text = format!("Tool execution error: {}", e);
                            (text.clone(), Some(text))
                        }
                    };

                results.push(ToolResultEntry {
                    call_id: call.id.clone(),
                    content: observation.clone(),
                    is_error: error.is_some(),
                });
                rounds.push(ToolCallRound {
                    round_index: rounds_used,
                    call_id: call.id,
                    tool_name: call.name,
                    arguments: call.arguments,
                    observation,
                    error,
                });
            }

            messages.push(Message::ToolResults { results });
            rounds_used += 1;
        }
    }
}
