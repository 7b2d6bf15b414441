//! `crag search`: retrieval without a language model.
//!
//! Runs the same search the `search_course_content` tool runs and prints
//! exactly the observation the model would see, followed by the sources.

use anyhow::Result;

use course_rag_core::error::RetrievalError;
use course_rag_core::search::{no_results_message, SearchRequest};

use crate::knowledge::KnowledgeBase;

pub async fn run_search(
    kb: &KnowledgeBase,
    query: &str,
    course: Option<&str>,
    lesson: Option<i64>,
    limit: usize,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let req = SearchRequest {
        query,
        collection: course,
        section: lesson,
        k: limit,
    };

    let hits = match kb.search(&req).await {
        Ok(hits) => hits,
        Err(e @ RetrievalError::Resolution { .. }) => {
            println!("{}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if hits.is_empty() {
        println!("{}", no_results_message(course, lesson));
        return Ok(());
    }

    let formatted = kb.format_hits(&hits).await;
    println!("{}", formatted.text);
    println!();
    println!("Sources:");
    for (i, source) in formatted.sources.iter().enumerate() {
        match &source.link {
            Some(link) => println!("  {}. {} <{}>", i + 1, source.label, link),
            None => println!("  {}. {}", i + 1, source.label),
        }
    }

    Ok(())
}
