//! Retrieval over the vector index.
//!
//! The [`Retriever`] turns a free-text query plus optional collection and
//! section constraints into ranked [`SearchHit`]s. It owns no state: the
//! caller lends it an index, an embedder and the current catalog of
//! collection names.
//!
//! # Pipeline
//!
//! 1. Resolve the requested collection name against the catalog
//!    ([`Retriever::resolve_collection`]).
//! 2. Build an AND-ed equality filter from the resolved name and the
//!    optional section number ([`build_filter`]).
//! 3. Embed the query and ask the index for the top `k` chunks in the
//!    content collection, `k` clamped to `[1, max_k]`.
//! 4. Map index matches back to hits; an empty result is `Ok(vec![])`.
//!
//! Rendering hits for a language model and deriving caller-visible
//! citations happen in [`format_hits`].

use crate::embedding::{embed_query, Embedder};
use crate::error::RetrievalError;
use crate::models::{
    merge_sources, Metadata, SearchHit, Source, CHUNK_INDEX_KEY, COLLECTION_KEY, DOCUMENT_KEY,
    SECTION_KEY,
};
use crate::store::{IndexMatch, IndexRecord, MetadataFilter, VectorIndex};

/// Index collection holding document chunks.
pub const CONTENT_COLLECTION: &str = "course_content";
/// Index collection holding one record per known course title.
pub const CATALOG_COLLECTION: &str = "course_catalog";
/// Metadata key holding a catalog record's title.
pub const CATALOG_TITLE_KEY: &str = "title";

/// Default upper bound for caller-supplied `k`.
pub const DEFAULT_MAX_K: usize = 50;
/// Default excerpt length, in characters, when rendering hits.
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// Inputs for a single [`Retriever::search`] call.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Free-text query.
    pub query: &'a str,
    /// Collection (course) name as typed by the user or model; fuzzy.
    pub collection: Option<&'a str>,
    /// Section (lesson) number.
    pub section: Option<i64>,
    /// Number of hits wanted.
    pub k: usize,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query: &'a str, k: usize) -> Self {
        Self {
            query,
            collection: None,
            section: None,
            k,
        }
    }
}

/// Stateless retrieval front-end over a [`VectorIndex`].
pub struct Retriever<'a> {
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    catalog: &'a [String],
    max_k: usize,
}

impl<'a> Retriever<'a> {
    /// `catalog` lists every known collection name, in registration order.
    pub fn new(index: &'a dyn VectorIndex, embedder: &'a dyn Embedder, catalog: &'a [String]) -> Self {
        Self {
            index,
            embedder,
            catalog,
            max_k: DEFAULT_MAX_K,
        }
    }

    pub fn with_max_k(mut self, max_k: usize) -> Self {
        self.max_k = max_k.max(1);
        self
    }

    /// Map a user-supplied collection name to a canonical catalog entry.
    ///
    /// Precedence: exact match, case-insensitive exact match, then
    /// case-insensitive containment in either direction. Several
    /// containment candidates are disambiguated by vector similarity
    /// between `name` and each candidate's catalog record.
    pub async fn resolve_collection(&self, name: &str) -> Result<String, RetrievalError> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return Err(RetrievalError::resolution(name));
        }

        if let Some(exact) = self.catalog.iter().find(|c| c.as_str() == wanted) {
            return Ok(exact.clone());
        }

        let lower = wanted.to_lowercase();
        if let Some(folded) = self.catalog.iter().find(|c| c.to_lowercase() == lower) {
            return Ok(folded.clone());
        }

        let candidates: Vec<&String> = self
            .catalog
            .iter()
            .filter(|c| {
                let c = c.to_lowercase();
                c.contains(&lower) || lower.contains(&c)
            })
            .collect();

        match candidates.as_slice() {
            [] => Err(RetrievalError::resolution(wanted)),
            [only] => Ok((*only).clone()),
            _ => self.most_similar(wanted, &candidates).await,
        }
    }

    async fn most_similar(
        &self,
        name: &str,
        candidates: &[&String],
    ) -> Result<String, RetrievalError> {
        let vector = embed_query(self.embedder, name)
            .await
            .map_err(RetrievalError::embedding)?;
        let ranked = self
            .index
            .query(Some(CATALOG_COLLECTION), None, &vector, self.catalog.len())
            .await
            .map_err(RetrievalError::index)?;

        let best = ranked.iter().find_map(|m| {
            let title = m
                .metadata
                .get(CATALOG_TITLE_KEY)
                .and_then(|v| v.as_str())
                .unwrap_or(m.id.as_str());
            candidates.iter().find(|c| c.as_str() == title)
        });

        // Candidates missing from the catalog index fall back to catalog order.
        Ok(best.unwrap_or(&candidates[0]).to_string())
    }

    /// Run a filtered similarity search over the content collection.
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<Vec<SearchHit>, RetrievalError> {
        // An unknown course is reported even for a blank query.
        let collection = match req.collection {
            Some(name) => Some(self.resolve_collection(name).await?),
            None => None,
        };

        let query = req.query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let filter = build_filter(collection.as_deref(), req.section);

        let vector = embed_query(self.embedder, query)
            .await
            .map_err(RetrievalError::embedding)?;
        let k = req.k.clamp(1, self.max_k);

        let matches = self
            .index
            .query(
                Some(CONTENT_COLLECTION),
                (!filter.is_empty()).then_some(&filter),
                &vector,
                k,
            )
            .await
            .map_err(RetrievalError::index)?;

        Ok(matches.into_iter().map(hit_from_match).collect())
    }
}

/// Combine an optional collection and an optional section into one filter.
pub fn build_filter(collection: Option<&str>, section: Option<i64>) -> MetadataFilter {
    let mut filter = MetadataFilter::new();
    if let Some(c) = collection {
        filter = filter.with(COLLECTION_KEY, c);
    }
    if let Some(n) = section {
        filter = filter.with(SECTION_KEY, n);
    }
    filter
}

/// Build the catalog record for a collection title.
pub fn catalog_record(title: &str, vector: Vec<f32>, mut metadata: Metadata) -> IndexRecord {
    metadata.insert(CATALOG_TITLE_KEY.to_string(), title.into());
    IndexRecord {
        id: title.to_string(),
        vector,
        text: title.to_string(),
        metadata,
    }
}

fn hit_from_match(m: IndexMatch) -> SearchHit {
    let str_field = |key: &str| {
        m.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    SearchHit {
        collection: str_field(COLLECTION_KEY),
        document_id: str_field(DOCUMENT_KEY),
        section: m.metadata.get(SECTION_KEY).and_then(|v| v.as_i64()),
        chunk_index: m.metadata.get(CHUNK_INDEX_KEY).and_then(|v| v.as_i64()),
        chunk_id: m.id,
        text: m.text,
        score: m.score,
    }
}

// ============ Formatting ============

/// Model-facing rendering of a hit list plus the citations it produced.
#[derive(Debug, Clone, Default)]
pub struct FormattedResults {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Render hits as `[Collection - Lesson N]` headed excerpts.
///
/// Blocks are separated by a blank line. Sources come out in first-seen
/// order with duplicate labels dropped; `link_for` supplies each hit's
/// link (typically the lesson link, else the course link).
pub fn format_hits<F>(hits: &[SearchHit], excerpt_chars: usize, link_for: F) -> FormattedResults
where
    F: Fn(&SearchHit) -> Option<String>,
{
    let mut blocks = Vec::with_capacity(hits.len());
    let mut sources = Vec::new();

    for hit in hits {
        let label = hit.label();
        blocks.push(format!("[{}]\n{}", label, excerpt(&hit.text, excerpt_chars)));
        merge_sources(&mut sources, &[Source::new(label, link_for(hit))]);
    }

    FormattedResults {
        text: blocks.join("\n\n"),
        sources,
    }
}

/// Observation text for an empty result, naming the filters applied.
pub fn no_results_message(collection: Option<&str>, section: Option<i64>) -> String {
    let mut msg = String::from("No relevant content found");
    if let Some(c) = collection {
        msg.push_str(&format!(" in course '{}'", c));
    }
    if let Some(n) = section {
        msg.push_str(&format!(" in lesson {}", n));
    }
    msg.push('.');
    msg
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::models::MetadataValue;
    use crate::store::InMemoryIndex;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Bag-of-words embedder over a fixed vocabulary.
    struct VocabEmbedder {
        vocab: Vec<&'static str>,
    }

    impl VocabEmbedder {
        fn new() -> Self {
            Self {
                vocab: vec![
                    "python", "programming", "basics", "advanced", "patterns", "guide",
                    "variables", "data", "values", "loops", "machine", "learning",
                ],
            }
        }
    }

    #[async_trait]
    impl Embedder for VocabEmbedder {
        fn model_name(&self) -> &str {
            "vocab"
        }
        fn dims(&self) -> usize {
            self.vocab.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    let words: Vec<&str> = lower
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|w| !w.is_empty())
                        .collect();
                    self.vocab
                        .iter()
                        .map(|v| words.iter().filter(|w| *w == v).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    async fn index_chunks(
        index: &InMemoryIndex,
        embedder: &VocabEmbedder,
        doc_id: &str,
        course: &str,
        lesson: Option<i64>,
        body: &str,
    ) {
        let chunks = chunk_text(doc_id, body, 800, 100);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(c, v)| {
                let mut md = c.metadata.clone();
                md.insert(COLLECTION_KEY.into(), course.into());
                md.insert(DOCUMENT_KEY.into(), doc_id.into());
                md.insert(CHUNK_INDEX_KEY.into(), MetadataValue::Int(c.chunk_index));
                if let Some(n) = lesson {
                    md.insert(SECTION_KEY.into(), MetadataValue::Int(n));
                }
                IndexRecord {
                    id: c.id,
                    vector: v,
                    text: c.text,
                    metadata: md,
                }
            })
            .collect();
        index.upsert(CONTENT_COLLECTION, records).await.unwrap();
    }

    async fn index_catalog(index: &InMemoryIndex, embedder: &VocabEmbedder, titles: &[String]) {
        let vectors = embedder.embed(titles).await.unwrap();
        let records = titles
            .iter()
            .zip(vectors)
            .map(|(t, v)| catalog_record(t, v, Metadata::new()))
            .collect();
        index.upsert(CATALOG_COLLECTION, records).await.unwrap();
    }

    fn titles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolution_precedence() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        let catalog = titles(&["Python Basics", "Machine Learning Fundamentals"]);
        let retriever = Retriever::new(&index, &embedder, &catalog);

        assert_eq!(
            retriever.resolve_collection("Python Basics").await.unwrap(),
            "Python Basics"
        );
        assert_eq!(
            retriever.resolve_collection("python basics").await.unwrap(),
            "Python Basics"
        );
        assert_eq!(
            retriever.resolve_collection("Machine Learning").await.unwrap(),
            "Machine Learning Fundamentals"
        );
        let err = retriever.resolve_collection("Nonexistent").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Resolution { ref name } if name == "Nonexistent"));
        assert!(retriever.resolve_collection("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_ambiguous_name_resolved_by_similarity() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        let catalog = titles(&[
            "Advanced Python Programming Patterns Guide",
            "Python Programming Basics",
        ]);
        index_catalog(&index, &embedder, &catalog).await;
        let retriever = Retriever::new(&index, &embedder, &catalog);

        let resolved = retriever
            .resolve_collection("python programming")
            .await
            .unwrap();
        assert_eq!(resolved, "Python Programming Basics");
    }

    #[tokio::test]
    async fn test_search_filters_by_course_and_lesson() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        let catalog = titles(&["Python Programming", "Machine Learning"]);
        index_chunks(&index, &embedder, "d1", "Python Programming", Some(1),
            "Python variables store data values.").await;
        index_chunks(&index, &embedder, "d2", "Python Programming", Some(2),
            "Python loops repeat work over data.").await;
        index_chunks(&index, &embedder, "d3", "Machine Learning", Some(1),
            "Machine learning models learn from data values.").await;
        let retriever = Retriever::new(&index, &embedder, &catalog);

        let hits = retriever
            .search(&SearchRequest {
                query: "What are Python variables?",
                collection: Some("python programming"),
                section: Some(1),
                k: 5,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection, "Python Programming");
        assert_eq!(hits[0].section, Some(1));
        assert_eq!(hits[0].document_id, "d1");

        let unfiltered = retriever
            .search(&SearchRequest::new("data values", 5))
            .await
            .unwrap();
        assert_eq!(unfiltered.len(), 3);
        assert!(unfiltered.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_unknown_course_is_resolution_error() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        let catalog = titles(&["Python Programming"]);
        let retriever = Retriever::new(&index, &embedder, &catalog);

        let mut req = SearchRequest::new("variables", 5);
        req.collection = Some("Nonexistent Course");
        let err = retriever.search(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "No course found matching 'Nonexistent Course'");

        req.query = "   ";
        assert!(matches!(
            retriever.search(&req).await,
            Err(RetrievalError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_hits() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        let retriever = Retriever::new(&index, &embedder, &[]);
        let hits = retriever
            .search(&SearchRequest::new("python", 5))
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert!(retriever
            .search(&SearchRequest::new("   ", 5))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let index = InMemoryIndex::new();
        let embedder = VocabEmbedder::new();
        for i in 0..4 {
            index_chunks(&index, &embedder, &format!("d{}", i), "Python Programming",
                Some(i), "python data").await;
        }
        let retriever = Retriever::new(&index, &embedder, &[]).with_max_k(2);
        let hits = retriever
            .search(&SearchRequest::new("python", 100))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let hits = retriever
            .search(&SearchRequest::new("python", 0))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    fn hit(collection: &str, section: Option<i64>, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: "c".into(),
            document_id: "d".into(),
            text: text.into(),
            score: 0.5,
            collection: collection.into(),
            section,
            chunk_index: Some(0),
        }
    }

    #[test]
    fn test_format_hits_headers_and_dedup() {
        let hits = vec![
            hit("Course A", Some(1), "first"),
            hit("Course A", Some(1), "second"),
            hit("Course C", None, "third"),
        ];
        let out = format_hits(&hits, 500, |h| {
            h.section.map(|n| format!("https://example.com/a/{}", n))
        });

        assert_eq!(
            out.text,
            "[Course A - Lesson 1]\nfirst\n\n[Course A - Lesson 1]\nsecond\n\n[Course C]\nthird"
        );
        assert_eq!(
            out.sources,
            vec![
                Source::new("Course A - Lesson 1", Some("https://example.com/a/1".into())),
                Source::new("Course C", None),
            ]
        );
    }

    #[test]
    fn test_excerpt_bounds_length() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
        assert_eq!(excerpt("ééééé", 2), "éé...");
    }

    #[test]
    fn test_no_results_message_names_filters() {
        assert_eq!(no_results_message(None, None), "No relevant content found.");
        assert_eq!(
            no_results_message(Some("Python Programming"), Some(99)),
            "No relevant content found in course 'Python Programming' in lesson 99."
        );
    }

    #[test]
    fn test_build_filter_omits_absent_parts() {
        assert!(build_filter(None, None).is_empty());
        assert_eq!(build_filter(Some("A"), None).conditions().len(), 1);
        assert_eq!(build_filter(None, Some(3)).conditions().len(), 1);
        assert_eq!(build_filter(Some("A"), Some(3)).conditions().len(), 2);
    }
}
