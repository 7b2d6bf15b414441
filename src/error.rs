//! Query-level error taxonomy.
//!
//! Tool-originated failures never reach this type on the normal path: the
//! registry turns them into observation text for the model. What remains
//! here terminates a query.

use thiserror::Error;

use course_rag_core::error::RetrievalError;

use crate::llm::ModelError;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Model invocation failed: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Model returned an empty answer")]
    EmptyAnswer,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
