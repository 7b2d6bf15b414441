//! Retrieval error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the retrieval layer.
///
/// An empty result set is not an error; callers receive `Ok(vec![])`.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A collection name matched nothing in the catalog.
    #[error("No course found matching '{name}'")]
    Resolution { name: String },

    /// The vector index rejected or failed the operation.
    #[error("Search error: {0}")]
    Index(String),

    /// The embedder could not vectorize the query.
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),
}

impl RetrievalError {
    pub fn resolution(name: impl Into<String>) -> Self {
        Self::Resolution { name: name.into() }
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }
}
