//! End-to-end tests of the tool loop against scripted language models.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use course_rag::config::Config;
use course_rag::embedding::HashEmbedder;
use course_rag::error::RagError;
use course_rag::knowledge::KnowledgeBase;
use course_rag::llm::{
    LanguageModel, Message, ModelError, ModelRequest, ModelResponse, ToolCallRequest,
};
use course_rag::models::{CourseInfo, LessonInfo, NewDocument, Source};
use course_rag::rag::RagSystem;
use course_rag::traits::{Tool, ToolContext, ToolOutput, ToolRegistry};
use course_rag_core::store::InMemoryIndex;

// ============ Scripted model ============

#[derive(Debug, Clone)]
struct SeenRequest {
    system: String,
    messages: Vec<Message>,
    tools_offered: bool,
}

/// Replays canned responses in order; answers "done" once the script runs out.
#[derive(Default)]
struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedModel {
    fn new(script: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(err: ModelError) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::from([Err(err)])),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(SeenRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tools_offered: request.tools.is_some(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelResponse::text("done")))
    }
}

/// Asks for a search every time tools are offered, answers when they are not.
struct GreedyModel {
    calls: Mutex<usize>,
    ignore_budget: bool,
}

#[async_trait]
impl LanguageModel for GreedyModel {
    fn name(&self) -> &str {
        "greedy"
    }

    fn model(&self) -> &str {
        "greedy-1"
    }

    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if request.tools.is_none() && !self.ignore_budget {
            return Ok(ModelResponse::text("Forced final answer."));
        }
        let mut response = ModelResponse::tool_calls(vec![call(
            &format!("call_{}", n),
            "search_course_content",
            json!({ "query": "loops" }),
        )]);
        response.text = "Still searching.".to_string();
        Ok(response)
    }
}

/// Never answers.
struct StuckModel;

#[async_trait]
impl LanguageModel for StuckModel {
    fn name(&self) -> &str {
        "stuck"
    }

    fn model(&self) -> &str {
        "stuck-1"
    }

    async fn invoke(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ModelResponse::text("too late"))
    }
}

struct ExplodingTool;

#[async_trait]
impl Tool for ExplodingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        bail!("index unavailable")
    }
}

// ============ Fixtures ============

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

async fn course_knowledge(config: &Config) -> Arc<KnowledgeBase> {
    let kb = Arc::new(KnowledgeBase::new(
        config,
        Arc::new(InMemoryIndex::new()),
        Arc::new(HashEmbedder::new(256)),
    ));

    let mut python = CourseInfo::new("Python Programming");
    python.link = Some("https://example.com/python".to_string());
    python.instructor = Some("Ada Lovelace".to_string());
    let lessons = [
        (0, "Introduction", "Welcome. This course teaches Python from scratch."),
        (1, "Variables", "Python variables store data values."),
        (2, "Loops", "A for loop iterates over a sequence of items."),
    ];
    for (number, title, _) in lessons {
        python.lessons.push(LessonInfo {
            number,
            title: title.to_string(),
            link: Some(format!("https://example.com/python/{}", number)),
        });
    }
    kb.register_course(python).await.unwrap();
    for (number, title, body) in lessons {
        kb.add_document(NewDocument {
            title: title.to_string(),
            body: body.to_string(),
            collection: "Python Programming".to_string(),
            section: Some(number),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let mut mcp = CourseInfo::new("MCP: Build Rich-Context AI Apps");
    mcp.link = Some("https://example.com/mcp".to_string());
    kb.register_course(mcp).await.unwrap();
    kb.add_document(NewDocument {
        title: "Why MCP".to_string(),
        body: "The Model Context Protocol standardises context for models.".to_string(),
        collection: "MCP: Build Rich-Context AI Apps".to_string(),
        section: Some(1),
        ..Default::default()
    })
    .await
    .unwrap();

    kb
}

async fn system_with(
    config: Config,
    model: Arc<dyn LanguageModel>,
    registry: ToolRegistry,
) -> RagSystem {
    let kb = course_knowledge(&config).await;
    RagSystem::new(config, kb, model, registry)
}

// ============ Tests ============

#[tokio::test]
async fn test_single_round_answer_with_lesson_source() {
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![call(
            "toolu_1",
            "search_course_content",
            json!({
                "query": "What are Python variables?",
                "course_name": "Python Programming",
                "lesson_number": 1
            }),
        )]),
        ModelResponse::text("Variables in Python store data values."),
    ]);
    let system = system_with(Config::default(), model.clone(), ToolRegistry::with_builtins()).await;

    let response = system
        .query("What does lesson 1 of the Python course say about variables?", None, None)
        .await
        .unwrap();

    assert_eq!(response.answer, "Variables in Python store data values.");
    assert_eq!(response.rounds.len(), 1);
    let round = &response.rounds[0];
    assert_eq!(round.round_index, 0);
    assert_eq!(round.tool_name, "search_course_content");
    assert!(round.error.is_none());
    assert!(round
        .observation
        .starts_with("[Python Programming - Lesson 1]\nPython variables store data values."));
    assert_eq!(
        response.sources,
        vec![Source::new(
            "Python Programming - Lesson 1",
            Some("https://example.com/python/1".to_string())
        )]
    );

    let seen = model.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].tools_offered);
    assert!(seen[1].tools_offered);
    assert_eq!(
        seen[0].messages,
        vec![Message::user(
            "Answer this question about course materials: \
             What does lesson 1 of the Python course say about variables?"
        )]
    );
    // question, assistant tool request, tool results
    assert_eq!(seen[1].messages.len(), 3);
    match &seen[1].messages[2] {
        Message::ToolResults { results } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].call_id, "toolu_1");
            assert!(!results[0].is_error);
        }
        other => panic!("expected tool results, got {:?}", other),
    }
}

#[tokio::test]
async fn test_direct_answer_uses_no_tools() {
    let model = ScriptedModel::new(vec![ModelResponse::text("Paris.")]);
    let system = system_with(Config::default(), model.clone(), ToolRegistry::with_builtins()).await;

    let response = system.query("Capital of France?", None, None).await.unwrap();
    assert_eq!(response.answer, "Paris.");
    assert!(response.rounds.is_empty());
    assert!(response.sources.is_empty());
    assert_eq!(model.seen().len(), 1);
}

#[tokio::test]
async fn test_round_budget_bounds_model_calls() {
    for max_rounds in 0..=3 {
        let mut config = Config::default();
        config.agent.max_rounds = max_rounds;
        let model = Arc::new(GreedyModel {
            calls: Mutex::new(0),
            ignore_budget: false,
        });
        let system = system_with(config, model.clone(), ToolRegistry::with_builtins()).await;

        let response = system.query("Tell me about loops", None, None).await.unwrap();
        assert_eq!(response.answer, "Forced final answer.");
        assert_eq!(response.rounds.len(), max_rounds);
        assert_eq!(*model.calls.lock().unwrap(), max_rounds + 1);
    }
}

#[tokio::test]
async fn test_tool_calls_after_budget_are_ignored() {
    let mut config = Config::default();
    config.agent.max_rounds = 1;
    let model = Arc::new(GreedyModel {
        calls: Mutex::new(0),
        ignore_budget: true,
    });
    let system = system_with(config, model.clone(), ToolRegistry::with_builtins()).await;

    let response = system.query("Tell me about loops", None, None).await.unwrap();
    assert_eq!(response.answer, "Still searching.");
    assert_eq!(response.rounds.len(), 1);
    assert_eq!(*model.calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_final_call_withholds_tools() {
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![call("a", "knowledge_stats", json!({}))]),
        ModelResponse::tool_calls(vec![call("b", "knowledge_stats", json!({}))]),
        ModelResponse::text("Two courses."),
    ]);
    let system = system_with(Config::default(), model.clone(), ToolRegistry::with_builtins()).await;

    let response = system.query("How many courses?", None, None).await.unwrap();
    assert_eq!(response.answer, "Two courses.");
    assert_eq!(response.rounds.len(), 2);
    assert_eq!(response.rounds[1].round_index, 1);

    let offered: Vec<bool> = model.seen().iter().map(|s| s.tools_offered).collect();
    assert_eq!(offered, vec![true, true, false]);
}

#[tokio::test]
async fn test_tool_failures_become_observations() {
    let mut registry = ToolRegistry::with_builtins();
    registry.register(Box::new(ExplodingTool));

    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![
            call("1", "explode", json!({})),
            call("2", "ghost", json!({})),
            call("3", "search_course_content", json!({})),
        ]),
        ModelResponse::text("Sorry, the search failed."),
    ]);
    let system = system_with(Config::default(), model.clone(), registry).await;

    let response = system.query("anything", None, None).await.unwrap();
    assert_eq!(response.answer, "Sorry, the search failed.");
    assert_eq!(response.rounds.len(), 3);
    assert!(response.rounds.iter().all(|r| r.round_index == 0));
    assert!(response.rounds.iter().all(|r| r.error.is_some()));

    assert_eq!(
        response.rounds[0].observation,
        "Tool execution error: index unavailable"
    );
    assert_eq!(
        response.rounds[1].observation,
        "Tool execution error: Tool 'ghost' not found"
    );
    assert!(response.rounds[2]
        .observation
        .contains("missing required parameter 'query'"));
    assert!(response.sources.is_empty());

    match &model.seen()[1].messages[2] {
        Message::ToolResults { results } => {
            let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
            assert_eq!(ids, vec!["1", "2", "3"]);
            assert!(results.iter().all(|r| r.is_error));
        }
        other => panic!("expected tool results, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_course_is_plain_observation() {
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![call(
            "1",
            "search_course_content",
            json!({ "query": "variables", "course_name": "Nonexistent" }),
        )]),
        ModelResponse::text("There is no such course."),
    ]);
    let system = system_with(Config::default(), model, ToolRegistry::with_builtins()).await;

    let response = system.query("variables?", None, None).await.unwrap();
    assert_eq!(
        response.rounds[0].observation,
        "No course found matching 'Nonexistent'"
    );
    assert!(response.rounds[0].error.is_none());
}

#[tokio::test]
async fn test_empty_knowledge_base_reports_no_content() {
    let config = Config::default();
    let kb = Arc::new(KnowledgeBase::new(
        &config,
        Arc::new(InMemoryIndex::new()),
        Arc::new(HashEmbedder::new(64)),
    ));
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![call(
            "1",
            "search_course_content",
            json!({ "query": "anything" }),
        )]),
        ModelResponse::text("Nothing is loaded yet."),
    ]);
    let system = RagSystem::new(config, kb, model, ToolRegistry::with_builtins());

    let response = system.query("anything?", None, None).await.unwrap();
    assert_eq!(response.rounds[0].observation, "No relevant content found.");
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn test_sources_latest_or_merged() {
    let script = || {
        vec![
            ModelResponse::tool_calls(vec![call(
                "1",
                "get_course_outline",
                json!({ "course_name": "Python" }),
            )]),
            ModelResponse::tool_calls(vec![call(
                "2",
                "search_course_content",
                json!({ "query": "variables", "course_name": "Python", "lesson_number": 1 }),
            )]),
            ModelResponse::text("Lesson 1 covers variables."),
        ]
    };
    let outline_source = Source::new(
        "Python Programming",
        Some("https://example.com/python".to_string()),
    );
    let lesson_source = Source::new(
        "Python Programming - Lesson 1",
        Some("https://example.com/python/1".to_string()),
    );

    let system = system_with(
        Config::default(),
        ScriptedModel::new(script()),
        ToolRegistry::with_builtins(),
    )
    .await;
    let latest = system.query("q", None, None).await.unwrap();
    assert_eq!(latest.sources, vec![lesson_source.clone()]);

    let mut config = Config::default();
    config.agent.merge_sources = true;
    let system = system_with(config, ScriptedModel::new(script()), ToolRegistry::with_builtins()).await;
    let merged = system.query("q", None, None).await.unwrap();
    assert_eq!(merged.sources, vec![outline_source, lesson_source]);
}

#[tokio::test]
async fn test_session_history_reaches_next_query() {
    let model = ScriptedModel::new(vec![
        ModelResponse::text("MCP is a protocol."),
        ModelResponse::text("It was covered in lesson 1."),
    ]);
    let system = system_with(Config::default(), model.clone(), ToolRegistry::with_builtins()).await;

    let first = system.query("What is MCP?", None, None).await.unwrap();
    let second = system
        .query("Which lesson?", Some(&first.session_id), None)
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);

    let seen = model.seen();
    assert!(!seen[0].system.contains("Previous conversation"));
    assert!(seen[1]
        .system
        .ends_with("Previous conversation:\nUser: What is MCP?\nAssistant: MCP is a protocol."));

    let history = system
        .sessions()
        .get_history(&first.session_id, None)
        .await
        .unwrap();
    assert_eq!(history.lines().count(), 4);
}

#[tokio::test]
async fn test_model_error_ends_query_without_recording() {
    let model = ScriptedModel::failing(ModelError::RateLimited("slow down".to_string()));
    let system = system_with(Config::default(), model, ToolRegistry::with_builtins()).await;
    let session = system.sessions().create_session().await;

    let err = system
        .query("What is MCP?", Some(&session), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Model(ModelError::RateLimited(_))));
    assert_eq!(system.sessions().get_history(&session, None).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_model_timeout() {
    let mut config = Config::default();
    config.llm.timeout_secs = 5;
    let system = system_with(config, Arc::new(StuckModel), ToolRegistry::with_builtins()).await;

    let err = system.query("hello", None, None).await.unwrap_err();
    assert!(matches!(err, RagError::Model(ModelError::Timeout(d)) if d == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_model_call() {
    let system = system_with(
        Config::default(),
        Arc::new(StuckModel),
        ToolRegistry::with_builtins(),
    )
    .await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = system.query("hello", None, Some(&token)).await.unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
}
