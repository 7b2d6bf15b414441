//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the narrow boundary between retrieval and
//! whatever similarity-search engine holds the vectors. It speaks in
//! named collections, scalar metadata, and AND-ed equality filters; the
//! persistence format behind it is the implementation's business.
//!
//! Implementations must be `Send + Sync` and safe for concurrent readers.
//! Write serialization per collection is the caller's concern (see the
//! knowledge base in the app crate).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Metadata, MetadataValue, DOCUMENT_KEY};

pub use memory::InMemoryIndex;

/// One vector plus its payload, as written by [`VectorIndex::upsert`].
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A ranked result from [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Per-collection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub distinct_document_count: usize,
}

/// Conjunction of metadata equality conditions.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key == value` to the conjunction.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Filter matching every chunk of one document.
    pub fn document(document_id: &str) -> Self {
        Self::new().with(DOCUMENT_KEY, document_id)
    }

    pub fn conditions(&self) -> &[(String, MetadataValue)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// Abstract similarity-search backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace records by ID |
/// | [`delete_where`](VectorIndex::delete_where) | Remove records matching a filter |
/// | [`query`](VectorIndex::query) | Top-k cosine search, optionally filtered |
/// | [`stats`](VectorIndex::stats) | Chunk and distinct-document counts |
/// | [`collections`](VectorIndex::collections) | Names of non-empty collections |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert records into `collection`, replacing any with the same ID.
    async fn upsert(&self, collection: &str, records: Vec<IndexRecord>) -> Result<()>;

    /// Delete every record in `collection` whose metadata matches `filter`.
    ///
    /// Returns the number of records removed.
    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    /// Return at most `k` records ranked by descending similarity.
    ///
    /// `collection = None` searches every collection. Ties keep insertion
    /// order.
    async fn query(
        &self,
        collection: Option<&str>,
        filter: Option<&MetadataFilter>,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<IndexMatch>>;

    /// Counts for `collection` (zeroes when it does not exist).
    async fn stats(&self, collection: &str) -> Result<IndexStats>;

    /// Names of collections that hold at least one record.
    async fn collections(&self) -> Result<Vec<String>>;
}
