//! In-memory [`VectorIndex`] implementation.
//!
//! Collections are `Vec`s behind a `std::sync::RwLock`, so insertion order
//! is preserved and doubles as the similarity tie-breaker. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::DOCUMENT_KEY;

use super::{IndexMatch, IndexRecord, IndexStats, MetadataFilter, VectorIndex};

/// In-memory vector index for the CLI, tests, and embedded use.
pub struct InMemoryIndex {
    collections: RwLock<BTreeMap<String, Vec<IndexRecord>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("vector index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, collection: &str, records: Vec<IndexRecord>) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections.entry(collection.to_string()).or_default();
        for record in records {
            stored.retain(|r| r.id != record.id);
            stored.push(record);
        }
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|r| !filter.matches(&r.metadata));
        let removed = before - stored.len();
        if stored.is_empty() {
            collections.remove(collection);
        }
        Ok(removed)
    }

    async fn query(
        &self,
        collection: Option<&str>,
        filter: Option<&MetadataFilter>,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let collections = self.collections.read().map_err(poisoned)?;

        let mut matches: Vec<IndexMatch> = collections
            .iter()
            .filter(|(name, _)| collection.map_or(true, |c| c == name.as_str()))
            .flat_map(|(_, records)| records.iter())
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| IndexMatch {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query_vec, &r.vector),
            })
            .collect();

        // sort_by is stable, so equal scores keep insertion order.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn stats(&self, collection: &str) -> Result<IndexStats> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(stored) = collections.get(collection) else {
            return Ok(IndexStats::default());
        };
        let documents: HashSet<String> = stored
            .iter()
            .filter_map(|r| r.metadata.get(DOCUMENT_KEY).map(|v| v.to_string()))
            .collect();
        Ok(IndexStats {
            chunk_count: stored.len(),
            distinct_document_count: documents.len(),
        })
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, MetadataValue};

    fn record(id: &str, doc: &str, vector: Vec<f32>, lesson: i64) -> IndexRecord {
        let mut metadata = Metadata::new();
        metadata.insert(DOCUMENT_KEY.into(), doc.into());
        metadata.insert("lesson_number".into(), MetadataValue::Int(lesson));
        IndexRecord {
            id: id.into(),
            vector,
            text: format!("text of {}", id),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .upsert(
                "content",
                vec![
                    record("far", "d1", vec![0.0, 1.0], 1),
                    record("near", "d1", vec![1.0, 0.1], 1),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query(Some("content"), None, &[1.0, 0.0], 10)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = InMemoryIndex::new();
        index
            .upsert(
                "content",
                vec![
                    record("a", "d1", vec![1.0, 0.0], 1),
                    record("b", "d1", vec![1.0, 0.0], 1),
                    record("c", "d1", vec![1.0, 0.0], 1),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query(Some("content"), None, &[1.0, 0.0], 2)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_filter_and_collection_scoping() {
        let index = InMemoryIndex::new();
        index
            .upsert(
                "content",
                vec![
                    record("l1", "d1", vec![1.0, 0.0], 1),
                    record("l2", "d2", vec![1.0, 0.0], 2),
                ],
            )
            .await
            .unwrap();
        index
            .upsert("catalog", vec![record("cat", "d3", vec![1.0, 0.0], 1)])
            .await
            .unwrap();

        let filter = MetadataFilter::new().with("lesson_number", 2i64);
        let hits = index
            .query(Some("content"), Some(&filter), &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "l2");

        let all = index.query(None, None, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_where_counts() {
        let index = InMemoryIndex::new();
        index
            .upsert(
                "content",
                vec![
                    record("c1", "d1", vec![1.0], 1),
                    record("c2", "d1", vec![1.0], 1),
                    record("c3", "d2", vec![1.0], 1),
                ],
            )
            .await
            .unwrap();
        index
            .upsert("content", vec![record("c1", "d1", vec![0.5], 1)])
            .await
            .unwrap();

        let stats = index.stats("content").await.unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.distinct_document_count, 2);

        let removed = index
            .delete_where("content", &MetadataFilter::document("d1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let stats = index.stats("content").await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(index.stats("missing").await.unwrap(), IndexStats::default());
        assert_eq!(index.collections().await.unwrap(), vec!["content".to_string()]);
    }
}
