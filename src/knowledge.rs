//! Knowledge base: documents, chunks, and the course catalog.
//!
//! [`KnowledgeBase`] is the single owner of everything the tools search.
//! It keeps documents in memory, chunks and embeds them into the
//! `course_content` index collection, and mirrors every registered course
//! title into `course_catalog` so fuzzy course names can be disambiguated
//! by similarity.
//!
//! # Concurrency
//!
//! Reads (search, outline, stats) run concurrently. Writes that touch the
//! index take a per-collection `tokio::sync::Mutex`, so two ingests into
//! the same course never interleave their delete and insert steps, while
//! ingests into different courses proceed in parallel.

use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use course_rag_core::chunk::chunk_text;
use course_rag_core::embedding::Embedder;
use course_rag_core::error::RetrievalError;
use course_rag_core::models::{CHUNK_INDEX_KEY, DOCUMENT_KEY};
use course_rag_core::search::{
    catalog_record, format_hits, FormattedResults, Retriever, SearchRequest, CATALOG_COLLECTION,
    CATALOG_TITLE_KEY, CONTENT_COLLECTION,
};
use course_rag_core::store::{IndexRecord, MetadataFilter, VectorIndex};

use crate::config::Config;
use crate::models::{
    CourseInfo, Document, DocumentUpdate, KnowledgeStats, Metadata, NewDocument, SearchHit,
    COLLECTION_KEY, SECTION_KEY,
};

pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    overlap: usize,
    batch_size: usize,
    max_k: usize,
    excerpt_chars: usize,
    search_timeout: Duration,
    documents: RwLock<BTreeMap<String, Document>>,
    /// Registration order is preserved; it is the tie-break for resolution.
    courses: RwLock<Vec<CourseInfo>>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KnowledgeBase {
    pub fn new(config: &Config, index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size.max(1),
            max_k: config.retrieval.max_k,
            excerpt_chars: config.retrieval.excerpt_chars,
            search_timeout: Duration::from_secs(config.retrieval.timeout_secs),
            documents: RwLock::new(BTreeMap::new()),
            courses: RwLock::new(Vec::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    async fn collection_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ============ Documents ============

    /// Store a document and index its chunks.
    ///
    /// A collection seen for the first time is registered in the catalog
    /// with no link, instructor or lessons.
    pub async fn add_document(&self, new: NewDocument) -> Result<Document> {
        if new.collection.trim().is_empty() {
            bail!("document collection must not be empty");
        }
        let id = new
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if !self.has_course(&new.collection).await {
            self.register_course(CourseInfo::new(new.collection.clone()))
                .await?;
        }

        let now = Utc::now();
        let doc = Document {
            id,
            title: new.title,
            body: new.body,
            collection: new.collection,
            section: new.section,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };

        let lock = self.collection_lock(&doc.collection).await;
        let _guard = lock.lock().await;

        if self.documents.read().await.contains_key(&doc.id) {
            bail!("document '{}' already exists", doc.id);
        }

        let chunks = self.index_document(&doc).await?;
        info!(
            document_id = %doc.id,
            collection = %doc.collection,
            chunks, "added document"
        );
        self.documents
            .write()
            .await
            .insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    /// Apply `update` and regenerate the document's chunks.
    ///
    /// Chunks are never edited in place: the old set is deleted and the
    /// new body re-chunked, even when only the title changed, so chunk
    /// metadata always matches the document.
    pub async fn update_document(&self, id: &str, update: DocumentUpdate) -> Result<Document> {
        let Some(collection) = self.document_collection(id).await else {
            bail!("document '{}' not found", id);
        };

        let lock = self.collection_lock(&collection).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; a queued delete may have won.
        let Some(mut doc) = self.get_document(id).await else {
            bail!("document '{}' not found", id);
        };

        if let Some(title) = update.title {
            doc.title = title;
        }
        if let Some(body) = update.body {
            doc.body = body;
        }
        if let Some(section) = update.section {
            doc.section = section;
        }
        if let Some(metadata) = update.metadata {
            doc.metadata.extend(metadata);
        }
        doc.updated_at = Utc::now();

        let removed = self
            .index
            .delete_where(CONTENT_COLLECTION, &MetadataFilter::document(id))
            .await?;
        let chunks = self.index_document(&doc).await?;
        info!(document_id = %id, removed, chunks, "updated document");

        self.documents
            .write()
            .await
            .insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    /// Remove a document and its chunks. Returns `false` if it was unknown.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let Some(collection) = self.document_collection(id).await else {
            return Ok(false);
        };

        let lock = self.collection_lock(&collection).await;
        let _guard = lock.lock().await;

        if !self.documents.read().await.contains_key(id) {
            return Ok(false);
        }

        let removed = self
            .index
            .delete_where(CONTENT_COLLECTION, &MetadataFilter::document(id))
            .await?;
        self.documents.write().await.remove(id);
        info!(document_id = %id, removed, "deleted document");
        Ok(true)
    }

    async fn document_collection(&self, id: &str) -> Option<String> {
        self.documents
            .read()
            .await
            .get(id)
            .map(|d| d.collection.clone())
    }

    pub async fn get_document(&self, id: &str) -> Option<Document> {
        self.documents.read().await.get(id).cloned()
    }

    /// Documents ordered by collection, then section, then title.
    pub async fn list_documents(&self, collection: Option<&str>) -> Vec<Document> {
        let docs = self.documents.read().await;
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| collection.map_or(true, |c| d.collection == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.collection, a.section, &a.title).cmp(&(&b.collection, b.section, &b.title))
        });
        out
    }

    /// Chunk, embed and upsert one document. Returns the chunk count.
    async fn index_document(&self, doc: &Document) -> Result<usize> {
        let chunks = chunk_text(&doc.id, &doc.body, self.chunk_size, self.overlap);
        if chunks.is_empty() {
            debug!(document_id = %doc.id, "document has no indexable text");
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed(batch).await?;
            if embedded.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }

        let records: Vec<IndexRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut metadata = chunk.metadata;
                metadata.insert(COLLECTION_KEY.to_string(), doc.collection.as_str().into());
                if let Some(n) = doc.section {
                    metadata.insert(SECTION_KEY.to_string(), n.into());
                }
                metadata.insert(DOCUMENT_KEY.to_string(), doc.id.as_str().into());
                metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk.chunk_index.into());
                metadata.insert("title".to_string(), doc.title.as_str().into());
                IndexRecord {
                    id: chunk.id,
                    vector,
                    text: chunk.text,
                    metadata,
                }
            })
            .collect();

        let count = records.len();
        self.index.upsert(CONTENT_COLLECTION, records).await?;
        Ok(count)
    }

    // ============ Course Catalog ============

    /// Add or replace a course's catalog entry.
    pub async fn register_course(&self, course: CourseInfo) -> Result<()> {
        if course.title.trim().is_empty() {
            bail!("course title must not be empty");
        }

        let vector = self
            .embedder
            .embed(&[course.title.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        let mut metadata = Metadata::new();
        if let Some(link) = &course.link {
            metadata.insert("course_link".to_string(), link.as_str().into());
        }
        if let Some(instructor) = &course.instructor {
            metadata.insert("instructor".to_string(), instructor.as_str().into());
        }
        metadata.insert("lesson_count".to_string(), course.lessons.len().into());

        self.index
            .upsert(
                CATALOG_COLLECTION,
                vec![catalog_record(&course.title, vector, metadata)],
            )
            .await?;

        let mut courses = self.courses.write().await;
        match courses.iter_mut().find(|c| c.title == course.title) {
            Some(existing) => *existing = course,
            None => {
                debug!(title = %course.title, "registered course");
                courses.push(course);
            }
        }
        Ok(())
    }

    /// Drop a course: its documents, their chunks and its catalog entry.
    /// Returns the number of documents removed.
    pub async fn remove_course(&self, title: &str) -> Result<usize> {
        let lock = self.collection_lock(title).await;
        let _guard = lock.lock().await;

        let chunks = self
            .index
            .delete_where(
                CONTENT_COLLECTION,
                &MetadataFilter::new().with(COLLECTION_KEY, title),
            )
            .await?;
        self.index
            .delete_where(
                CATALOG_COLLECTION,
                &MetadataFilter::new().with(CATALOG_TITLE_KEY, title),
            )
            .await?;

        let documents = {
            let mut docs = self.documents.write().await;
            let before = docs.len();
            docs.retain(|_, d| d.collection != title);
            before - docs.len()
        };
        self.courses.write().await.retain(|c| c.title != title);

        info!(course = %title, documents, chunks, "removed course");
        Ok(documents)
    }

    pub async fn has_course(&self, title: &str) -> bool {
        self.courses.read().await.iter().any(|c| c.title == title)
    }

    /// Course titles in registration order.
    pub async fn collection_names(&self) -> Vec<String> {
        self.courses
            .read()
            .await
            .iter()
            .map(|c| c.title.clone())
            .collect()
    }

    pub async fn resolve_course(&self, name: &str) -> Result<String, RetrievalError> {
        let names = self.collection_names().await;
        self.retriever(&names).resolve_collection(name).await
    }

    /// Catalog entry for a fuzzy course name.
    pub async fn course_outline(&self, name: &str) -> Result<CourseInfo, RetrievalError> {
        let title = self.resolve_course(name).await?;
        self.courses
            .read()
            .await
            .iter()
            .find(|c| c.title == title)
            .cloned()
            .ok_or_else(|| RetrievalError::resolution(name))
    }

    pub async fn course_link(&self, title: &str) -> Option<String> {
        let courses = self.courses.read().await;
        courses
            .iter()
            .find(|c| c.title == title)
            .and_then(|c| c.link.clone())
    }

    pub async fn lesson_link(&self, title: &str, lesson: i64) -> Option<String> {
        let courses = self.courses.read().await;
        courses
            .iter()
            .find(|c| c.title == title)
            .and_then(|c| c.lesson(lesson))
            .and_then(|l| l.link.clone())
    }

    // ============ Search ============

    fn retriever<'a>(&'a self, names: &'a [String]) -> Retriever<'a> {
        Retriever::new(self.index.as_ref(), self.embedder.as_ref(), names).with_max_k(self.max_k)
    }

    /// Filtered similarity search, bounded by `retrieval.timeout_secs`.
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<Vec<SearchHit>, RetrievalError> {
        let names = self.collection_names().await;
        let retriever = self.retriever(&names);
        match tokio::time::timeout(self.search_timeout, retriever.search(req)).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout(self.search_timeout)),
        }
    }

    /// Render hits for the model, linking each to its lesson or course.
    pub async fn format_hits(&self, hits: &[SearchHit]) -> FormattedResults {
        let courses = self.courses.read().await;
        format_hits(hits, self.excerpt_chars, |hit| {
            let course = courses.iter().find(|c| c.title == hit.collection)?;
            hit.section
                .and_then(|n| course.lesson(n))
                .and_then(|l| l.link.clone())
                .or_else(|| course.link.clone())
        })
    }

    // ============ Maintenance ============

    pub async fn stats(&self) -> Result<KnowledgeStats> {
        let index_stats = self.index.stats(CONTENT_COLLECTION).await?;
        Ok(KnowledgeStats {
            documents: self.documents.read().await.len(),
            chunks: index_stats.chunk_count,
            courses: self.courses.read().await.len(),
            course_titles: self.collection_names().await,
        })
    }

    /// Drop every document, chunk and catalog entry.
    pub async fn clear(&self) -> Result<()> {
        let all = MetadataFilter::new();
        let chunks = self.index.delete_where(CONTENT_COLLECTION, &all).await?;
        self.index.delete_where(CATALOG_COLLECTION, &all).await?;
        self.documents.write().await.clear();
        self.courses.write().await.clear();
        info!(chunks, "cleared knowledge base");
        Ok(())
    }
}
