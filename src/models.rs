//! Application data types.
//!
//! Chunk, document, hit and source types live in `course_rag_core::models`
//! and are re-exported here. This module adds the course catalog types and
//! the inputs accepted by the knowledge base.

use serde::{Deserialize, Serialize};

pub use course_rag_core::models::{
    Chunk, Document, Metadata, MetadataValue, SearchHit, Source, COLLECTION_KEY, SECTION_KEY,
};

/// Catalog entry for one course (collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub title: String,
    pub link: Option<String>,
    pub instructor: Option<String>,
    pub lessons: Vec<LessonInfo>,
}

impl CourseInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: None,
            instructor: None,
            lessons: Vec::new(),
        }
    }

    pub fn lesson(&self, number: i64) -> Option<&LessonInfo> {
        self.lessons.iter().find(|l| l.number == number)
    }

    /// Plain-text outline: title, link, instructor, then numbered lessons.
    pub fn outline(&self) -> String {
        let mut out = format!("Course Title: {}", self.title);
        if let Some(link) = &self.link {
            out.push_str(&format!("\nCourse Link: {}", link));
        }
        if let Some(instructor) = &self.instructor {
            out.push_str(&format!("\nCourse Instructor: {}", instructor));
        }
        if self.lessons.is_empty() {
            out.push_str("\nLessons: none listed");
        } else {
            out.push_str(&format!("\nLessons ({}):", self.lessons.len()));
            for lesson in &self.lessons {
                out.push_str(&format!("\n  Lesson {}: {}", lesson.number, lesson.title));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonInfo {
    pub number: i64,
    pub title: String,
    pub link: Option<String>,
}

/// Input for [`KnowledgeBase::add_document`](crate::knowledge::KnowledgeBase::add_document).
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    /// Caller-chosen ID; a random UUID is assigned when `None`.
    pub id: Option<String>,
    pub title: String,
    pub body: String,
    pub collection: String,
    pub section: Option<i64>,
    pub metadata: Metadata,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub section: Option<Option<i64>>,
    pub metadata: Option<Metadata>,
}

/// Counts reported by `crag stats` and the `knowledge_stats` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub documents: usize,
    pub chunks: usize,
    pub courses: usize,
    pub course_titles: Vec<String>,
}
