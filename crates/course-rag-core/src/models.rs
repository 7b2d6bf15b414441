//! Core data models shared by the chunker, index, and retriever.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key holding the collection (course) a chunk belongs to.
pub const COLLECTION_KEY: &str = "course_title";
/// Metadata key holding the section (lesson) number of a chunk.
pub const SECTION_KEY: &str = "lesson_number";
/// Metadata key linking a chunk back to its parent document.
pub const DOCUMENT_KEY: &str = "document_id";
/// Metadata key holding the chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// A scalar metadata value attached to documents and chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Ordered scalar metadata map.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Half-open character range `[start, end)` into the source document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A source document owned by the knowledge base.
///
/// `collection` groups documents (one course); `section` is the optional
/// lesson number inside it. Replacing `body` always regenerates the
/// document's chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub collection: String,
    pub section: Option<i64>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous slice of a document's body text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub char_span: CharSpan,
    pub metadata: Metadata,
    pub hash: String,
}

/// A ranked chunk returned by the retriever.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
    /// Resolved collection name (course title).
    pub collection: String,
    /// Lesson number, when the chunk belongs to one.
    pub section: Option<i64>,
    pub chunk_index: Option<i64>,
}

impl SearchHit {
    /// Human-readable citation label: `Collection - Lesson N` or `Collection`.
    pub fn label(&self) -> String {
        match self.section {
            Some(n) => format!("{} - Lesson {}", self.collection, n),
            None => self.collection.clone(),
        }
    }
}

/// A citation shown to the caller next to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Source {
    pub fn new(label: impl Into<String>, link: Option<String>) -> Self {
        Self {
            label: label.into(),
            link,
        }
    }
}

/// Append `incoming` to `sources`, skipping labels already present.
pub fn merge_sources(sources: &mut Vec<Source>, incoming: &[Source]) {
    for src in incoming {
        if !sources.iter().any(|s| s.label == src.label) {
            sources.push(src.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(collection: &str, section: Option<i64>) -> SearchHit {
        SearchHit {
            chunk_id: "c".into(),
            document_id: "d".into(),
            text: String::new(),
            score: 1.0,
            collection: collection.into(),
            section,
            chunk_index: Some(0),
        }
    }

    #[test]
    fn test_label_with_and_without_section() {
        assert_eq!(hit("Course A", Some(1)).label(), "Course A - Lesson 1");
        assert_eq!(hit("Course C", None).label(), "Course C");
    }

    #[test]
    fn test_merge_sources_dedups_by_label() {
        let mut sources = vec![Source::new("A - Lesson 1", None)];
        merge_sources(
            &mut sources,
            &[
                Source::new("A - Lesson 1", Some("https://x".into())),
                Source::new("B", None),
            ],
        );
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].link, None);
        assert_eq!(sources[1].label, "B");
    }

    #[test]
    fn test_metadata_value_untagged_serde() {
        let v: Metadata = serde_json::from_str(r#"{"a": 1, "b": "x", "c": true}"#).unwrap();
        assert_eq!(v["a"], MetadataValue::Int(1));
        assert_eq!(v["b"], MetadataValue::Str("x".into()));
        assert_eq!(v["c"], MetadataValue::Bool(true));
    }
}
