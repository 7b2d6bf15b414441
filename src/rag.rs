//! The RAG system facade.
//!
//! [`RagSystem`] wires the knowledge base, tool registry, language model
//! and session store together and exposes the two operations callers
//! actually want: load documents, and ask a question.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use course_rag_core::embedding::Embedder;
use course_rag_core::store::{InMemoryIndex, VectorIndex};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::knowledge::KnowledgeBase;
use crate::llm::{create_model, LanguageModel};
use crate::loader::{ingest_folder, IngestSummary};
use crate::models::Source;
use crate::orchestrator::{Orchestrator, ToolCallRound};
use crate::session::SessionStore;
use crate::traits::{ToolContext, ToolRegistry};

/// Answer to one [`RagSystem::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
    pub rounds: Vec<ToolCallRound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}

/// An empty knowledge base over an in-memory index and the configured
/// embedder. Needs no language model.
pub fn knowledge_from_config(config: &Config) -> Result<Arc<KnowledgeBase>> {
    let index: Arc<dyn VectorIndex> = Arc::new(InMemoryIndex::new());
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    Ok(Arc::new(KnowledgeBase::new(config, index, embedder)))
}

pub struct RagSystem {
    config: Config,
    knowledge: Arc<KnowledgeBase>,
    orchestrator: Orchestrator,
    sessions: SessionStore,
}

impl RagSystem {
    /// Build from configuration: in-memory index, configured embedder and
    /// model, built-in tools.
    pub fn from_config(config: Config) -> Result<Self> {
        let knowledge = knowledge_from_config(&config)?;
        let model: Arc<dyn LanguageModel> = Arc::from(create_model(&config.llm)?);
        Ok(Self::new(
            config,
            knowledge,
            model,
            ToolRegistry::with_builtins(),
        ))
    }

    pub fn new(
        config: Config,
        knowledge: Arc<KnowledgeBase>,
        model: Arc<dyn LanguageModel>,
        registry: ToolRegistry,
    ) -> Self {
        let ctx = ToolContext::new(knowledge.clone(), &config.retrieval);
        let orchestrator = Orchestrator::new(
            model,
            Arc::new(registry),
            ctx,
            &config.agent,
            &config.llm,
        );
        let sessions = SessionStore::new(&config.session);
        Self {
            config,
            knowledge,
            orchestrator,
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.orchestrator.registry()
    }

    /// Load course files from `dir` (see [`crate::loader`]).
    pub async fn add_course_folder(&self, dir: &Path, clear_existing: bool) -> Result<IngestSummary> {
        ingest_folder(&self.knowledge, dir, &self.config.docs, clear_existing).await
    }

    /// Answer a question, continuing `session_id` when given.
    ///
    /// A new session is created when `session_id` is `None`. The exchange
    /// is recorded only when the query succeeds.
    pub async fn query(
        &self,
        question: &str,
        session_id: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryResponse, RagError> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.sessions.create_session().await,
        };
        let history = self.sessions.get_history(&session_id, None).await;

        let prompt = format!("Answer this question about course materials: {}", question);
        let fallback = CancellationToken::new();
        let cancel = cancel.unwrap_or(&fallback);

        let outcome = self
            .orchestrator
            .run(&prompt, history.as_deref(), cancel)
            .await?;

        self.sessions
            .add_exchange(&session_id, question, &outcome.answer)
            .await;

        Ok(QueryResponse {
            answer: outcome.answer,
            sources: outcome.sources,
            session_id,
            rounds: outcome.rounds,
        })
    }

    pub async fn course_analytics(&self) -> CourseAnalytics {
        let course_titles = self.knowledge.collection_names().await;
        CourseAnalytics {
            total_courses: course_titles.len(),
            course_titles,
        }
    }
}
