//! Tool trait, registry, and the built-in course tools.
//!
//! Tools are what the language model can call during a query. Each one
//! returns observation text for the model plus the [`Source`]s that text
//! was derived from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  ┌─────────────────┐ ┌────────────────┐  │
//! │  │ search_course_  │ │ get_course_    │  │
//! │  │ content         │ │ outline        │  │
//! │  └─────────────────┘ └────────────────┘  │
//! │  ┌─────────────────┐ ┌────────────────┐  │
//! │  │ knowledge_stats │ │ Custom (Rust)  │  │
//! │  └─────────────────┘ └────────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     ToolInvocation (one per query) → Orchestrator
//! ```
//!
//! The registry is immutable once built and shared across queries behind
//! an `Arc`. Per-query state (which sources the last tool produced) lives
//! in a [`ToolInvocation`], which is never shared.
//!
//! # Usage
//!
//! ```rust
//! use course_rag::traits::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins();
//! assert_eq!(tools.len(), 3);
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use course_rag_core::error::RetrievalError;
use course_rag_core::models::merge_sources;
use course_rag_core::search::{no_results_message, SearchRequest};

use crate::config::RetrievalConfig;
use crate::error::RagError;
use crate::knowledge::KnowledgeBase;
use crate::llm::ToolSpec;
use crate::models::Source;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// What a tool hands back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Observation text shown to the model.
    pub text: String,
    /// Citations backing `text`, deduplicated by label.
    pub sources: Vec<Source>,
    /// Set when `text` describes a failure rather than a result.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_sources(text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            text: text.into(),
            sources,
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Tool execution error: {}", message),
            sources: Vec::new(),
            is_error: true,
        }
    }
}

/// A tool the model can discover and call.
///
/// # Lifecycle
///
/// 1. The tool is registered via [`ToolRegistry::register`].
/// 2. [`name`](Tool::name), [`description`](Tool::description), and
///    [`parameters_schema`](Tool::parameters_schema) become the
///    [`ToolSpec`] sent to the model while tool rounds remain.
/// 3. [`execute`](Tool::execute) runs each time the model requests it.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use course_rag::traits::{Tool, ToolContext, ToolOutput};
///
/// pub struct CourseCountTool;
///
/// #[async_trait]
/// impl Tool for CourseCountTool {
///     fn name(&self) -> &str { "course_count" }
///     fn description(&self) -> &str { "Count the courses in the catalog" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {}, "required": [] })
///     }
///
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
///         let n = ctx.knowledge().collection_names().await.len();
///         Ok(ToolOutput::text(format!("{} courses", n)))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"search_course_content"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments: `type: "object"` with `properties`
    /// and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Run the tool.
    ///
    /// Errors are caught by the registry and shown to the model as
    /// `Tool execution error: <message>`; they never abort the query.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared state a tool may read while executing.
#[derive(Clone)]
pub struct ToolContext {
    knowledge: Arc<KnowledgeBase>,
    max_results: usize,
}

impl ToolContext {
    pub fn new(knowledge: Arc<KnowledgeBase>, retrieval: &RetrievalConfig) -> Self {
        Self {
            knowledge,
            max_results: retrieval.max_results,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Default `k` for searches issued by tools.
    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tool Implementations
// ═══════════════════════════════════════════════════════════════════════

/// Read an optional integer argument, accepting `2`, `2.0` and `"2"`.
fn int_param(params: &Value, key: &str) -> Result<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        {
            Some(v) => Ok(Some(v)),
            None => bail!("'{}' must be an integer", key),
        },
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => bail!("'{}' must be an integer, got '{}'", key, s),
        },
        Some(other) => bail!("'{}' must be an integer, got {}", key, other),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Semantic search over course content with optional course and lesson filters.
pub struct SearchCourseContentTool;

#[async_trait]
impl Tool for SearchCourseContentTool {
    fn name(&self) -> &str {
        "search_course_content"
    }

    fn description(&self) -> &str {
        "Search course materials with smart course name matching and lesson filtering"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for in the course content" },
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                },
                "lesson_number": {
                    "type": "integer",
                    "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(query) = params.get("query").and_then(|v| v.as_str()) else {
            bail!("missing required parameter 'query'");
        };
        let course_name = str_param(&params, "course_name");
        let lesson_number = int_param(&params, "lesson_number")?;

        let req = SearchRequest {
            query,
            collection: course_name,
            section: lesson_number,
            k: ctx.max_results(),
        };

        match ctx.knowledge().search(&req).await {
            Ok(hits) if hits.is_empty() => Ok(ToolOutput::text(no_results_message(
                course_name,
                lesson_number,
            ))),
            Ok(hits) => {
                let formatted = ctx.knowledge().format_hits(&hits).await;
                Ok(ToolOutput::with_sources(formatted.text, formatted.sources))
            }
            Err(e @ RetrievalError::Resolution { .. }) => Ok(ToolOutput::text(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Course title, link, instructor and lesson list for a fuzzy course name.
pub struct CourseOutlineTool;

#[async_trait]
impl Tool for CourseOutlineTool {
    fn name(&self) -> &str {
        "get_course_outline"
    }

    fn description(&self) -> &str {
        "Get a course's title, link, instructor and complete numbered lesson list"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work)"
                }
            },
            "required": ["course_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(name) = str_param(&params, "course_name") else {
            bail!("missing required parameter 'course_name'");
        };

        match ctx.knowledge().course_outline(name).await {
            Ok(course) => {
                let source = Source::new(course.title.clone(), course.link.clone());
                Ok(ToolOutput::with_sources(course.outline(), vec![source]))
            }
            Err(e @ RetrievalError::Resolution { .. }) => Ok(ToolOutput::text(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Document, chunk and course counts.
pub struct KnowledgeStatsTool;

#[async_trait]
impl Tool for KnowledgeStatsTool {
    fn name(&self) -> &str {
        "knowledge_stats"
    }

    fn description(&self) -> &str {
        "Report how many courses, documents and chunks the knowledge base holds"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let stats = ctx.knowledge().stats().await?;
        let mut text = format!(
            "Courses: {}\nDocuments: {}\nChunks: {}",
            stats.courses, stats.documents, stats.chunks
        );
        for title in &stats.course_titles {
            text.push_str(&format!("\n- {}", title));
        }
        Ok(ToolOutput::text(text))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of tools, keyed by name, in registration order.
///
/// # Example
///
/// ```rust
/// use course_rag::traits::ToolRegistry;
///
/// let tools = ToolRegistry::with_builtins();
/// let names: Vec<String> = tools.tool_specs().into_iter().map(|s| s.name).collect();
/// assert_eq!(names, ["search_course_content", "get_course_outline", "knowledge_stats"]);
/// ```
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with the built-in course tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchCourseContentTool));
        registry.register(Box::new(CourseOutlineTool));
        registry.register(Box::new(KnowledgeStatsTool));
        registry
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => {
                warn!(tool = tool.name(), "replacing previously registered tool");
                *existing = tool;
            }
            None => self.tools.push(tool),
        }
    }

    /// Get all registered tools.
    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Specs for every tool, in registration order.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Run a tool, surfacing its failure as [`RagError::ToolExecution`].
    pub async fn call(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, RagError> {
        let tool = self
            .find(name)
            .ok_or_else(|| RagError::ToolNotFound(name.to_string()))?;
        debug!(tool = name, %params, "executing tool");
        tool.execute(params, ctx)
            .await
            .map_err(|e| RagError::ToolExecution {
                tool: name.to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Run a tool for the model.
    ///
    /// Only an unknown name is an error; a failing tool yields an
    /// error observation with no sources.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, RagError> {
        match self.call(name, params, ctx).await {
            Err(RagError::ToolExecution { tool, message }) => {
                warn!(tool = %tool, error = %message, "tool failed");
                Ok(ToolOutput::error(message))
            }
            other => other,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolInvocation
// ═══════════════════════════════════════════════════════════════════════

/// Per-query view of the registry that remembers produced sources.
pub struct ToolInvocation<'a> {
    registry: &'a ToolRegistry,
    ctx: &'a ToolContext,
    last_sources: Vec<Source>,
    all_sources: Vec<Source>,
}

impl<'a> ToolInvocation<'a> {
    pub fn new(registry: &'a ToolRegistry, ctx: &'a ToolContext) -> Self {
        Self {
            registry,
            ctx,
            last_sources: Vec::new(),
            all_sources: Vec::new(),
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.tool_specs()
    }

    /// Execute through the registry and record non-empty source sets.
    pub async fn execute(&mut self, name: &str, params: Value) -> Result<ToolOutput, RagError> {
        let output = self.registry.execute(name, params, self.ctx).await?;
        if !output.sources.is_empty() {
            self.last_sources = output.sources.clone();
            merge_sources(&mut self.all_sources, &output.sources);
        }
        Ok(output)
    }

    /// Sources of the most recent tool call that produced any.
    pub fn last_sources(&self) -> &[Source] {
        &self.last_sources
    }

    /// Every source produced so far, first-seen order, unique labels.
    pub fn all_sources(&self) -> &[Source] {
        &self.all_sources
    }

    pub fn reset_sources(&mut self) {
        self.last_sources.clear();
        self.all_sources.clear();
    }
}
