//! Course document loading.
//!
//! Course files are plain text with a small header followed by lessons:
//!
//! ```text
//! Course Title: Python Programming
//! Course Link: https://example.com/python
//! Course Instructor: Ada
//!
//! Lesson 0: Introduction
//! Lesson Link: https://example.com/python/0
//! Welcome to the course...
//!
//! Lesson 1: Variables
//! Python variables store data values.
//! ```
//!
//! Every lesson becomes one document in the course's collection with the
//! lesson number as its section. Text between the header and the first
//! lesson becomes an unsectioned document. A file without a
//! `Course Title:` header is loaded whole as one document whose collection
//! is the file stem.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::DocsConfig;
use crate::knowledge::KnowledgeBase;
use crate::models::{CourseInfo, LessonInfo, Metadata, NewDocument};

/// One parsed course file.
#[derive(Debug, Clone)]
pub struct ParsedCourse {
    pub course: CourseInfo,
    pub documents: Vec<NewDocument>,
}

/// Outcome of [`ingest_folder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub courses_added: usize,
    pub chunks_created: usize,
}

struct PendingLesson {
    number: i64,
    title: String,
    link: Option<String>,
    body: Vec<String>,
}

/// Parse course text. `fallback_title` names the collection when the text
/// has no `Course Title:` header.
pub fn parse_course_text(text: &str, fallback_title: &str) -> Result<ParsedCourse> {
    let lesson_re = Regex::new(r"(?i)^lesson\s+(\d+)\s*:\s*(.*)$")?;

    let mut course = CourseInfo::new(fallback_title);
    let mut has_header = false;
    let mut preamble = Vec::new();
    let mut lessons: Vec<PendingLesson> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(caps) = lesson_re.captures(trimmed) {
            let number: i64 = caps[1]
                .parse()
                .with_context(|| format!("invalid lesson number in '{}'", trimmed))?;
            lessons.push(PendingLesson {
                number,
                title: caps[2].trim().to_string(),
                link: None,
                body: Vec::new(),
            });
            continue;
        }

        match lessons.last_mut() {
            Some(lesson) => {
                if lesson.body.is_empty() && lesson.link.is_none() {
                    if let Some(link) = header_value(trimmed, "Lesson Link:") {
                        lesson.link = Some(link);
                        continue;
                    }
                }
                lesson.body.push(line.to_string());
            }
            None => {
                if let Some(title) = header_value(trimmed, "Course Title:") {
                    course.title = title;
                    has_header = true;
                } else if let Some(link) = header_value(trimmed, "Course Link:") {
                    course.link = Some(link);
                } else if let Some(name) = header_value(trimmed, "Course Instructor:") {
                    course.instructor = Some(name);
                } else {
                    preamble.push(line.to_string());
                }
            }
        }
    }

    if !has_header {
        // Headerless files are a single document; lesson markers are just text.
        return Ok(ParsedCourse {
            documents: vec![NewDocument {
                title: fallback_title.to_string(),
                body: text.to_string(),
                collection: fallback_title.to_string(),
                ..Default::default()
            }],
            course: CourseInfo::new(fallback_title),
        });
    }

    let mut documents = Vec::new();
    let preamble = preamble.join("\n");
    if !preamble.trim().is_empty() {
        documents.push(NewDocument {
            title: course.title.clone(),
            body: preamble.trim().to_string(),
            collection: course.title.clone(),
            ..Default::default()
        });
    }

    for lesson in lessons {
        let mut metadata = Metadata::new();
        if let Some(link) = &lesson.link {
            metadata.insert("lesson_link".to_string(), link.as_str().into());
        }
        documents.push(NewDocument {
            title: lesson.title.clone(),
            body: lesson.body.join("\n").trim().to_string(),
            collection: course.title.clone(),
            section: Some(lesson.number),
            metadata,
            ..Default::default()
        });
        course.lessons.push(LessonInfo {
            number: lesson.number,
            title: lesson.title,
            link: lesson.link,
        });
    }

    Ok(ParsedCourse { course, documents })
}

fn header_value(line: &str, prefix: &str) -> Option<String> {
    let head = line.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let value = line[prefix.len()..].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Read and parse one course file.
pub fn load_course_file(path: &Path) -> Result<ParsedCourse> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read course file: {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "untitled".to_string());
    parse_course_text(&text, &stem)
}

/// Load every matching file under `dir` into `kb`.
///
/// Courses already in the catalog are skipped, so re-running an ingest is
/// cheap. With `clear_existing` the knowledge base is emptied first.
/// Unreadable files are logged and skipped.
pub async fn ingest_folder(
    kb: &KnowledgeBase,
    dir: &Path,
    docs: &DocsConfig,
    clear_existing: bool,
) -> Result<IngestSummary> {
    if !dir.exists() {
        bail!("Document folder does not exist: {}", dir.display());
    }

    if clear_existing {
        kb.clear().await?;
    }

    let include_set = build_globset(&docs.include_globs)?;
    let mut default_excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    default_excludes.extend(docs.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();

    let chunks_before = kb.stats().await?.chunks;
    let mut summary = IngestSummary::default();

    for path in paths {
        let parsed = match load_course_file(&path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable course file");
                continue;
            }
        };

        if kb.has_course(&parsed.course.title).await {
            info!(course = %parsed.course.title, "course already loaded, skipping");
            continue;
        }

        if let Err(e) = load_course(kb, &parsed, &path).await {
            // A half-loaded course would be skipped forever by `has_course`.
            if let Err(rollback) = kb.remove_course(&parsed.course.title).await {
                warn!(course = %parsed.course.title, error = %rollback, "rollback failed");
            }
            return Err(e.context(format!(
                "Failed to load course '{}' from {}",
                parsed.course.title,
                path.display()
            )));
        }
        summary.courses_added += 1;
        info!(
            course = %parsed.course.title,
            lessons = parsed.course.lessons.len(),
            "loaded course"
        );
    }

    summary.chunks_created = kb.stats().await?.chunks.saturating_sub(chunks_before);
    Ok(summary)
}

async fn load_course(kb: &KnowledgeBase, parsed: &ParsedCourse, path: &Path) -> Result<()> {
    kb.register_course(parsed.course.clone()).await?;
    for doc in &parsed.documents {
        let mut doc = doc.clone();
        doc.metadata.insert(
            "source_file".to_string(),
            path.to_string_lossy().as_ref().into(),
        );
        kb.add_document(doc).await?;
    }
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
