//! `crag stats`: what the knowledge base holds after loading.

use anyhow::Result;

use crate::knowledge::KnowledgeBase;

pub async fn run_stats(kb: &KnowledgeBase) -> Result<()> {
    let stats = kb.stats().await?;

    println!("Course RAG — Knowledge Base Stats");
    println!("=================================");
    println!();
    println!("  Embedder:    {} ({} dims)", kb.embedder().model_name(), kb.embedder().dims());
    println!("  Courses:     {}", stats.courses);
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);

    if !stats.course_titles.is_empty() {
        println!();
        println!("  Courses:");
        for title in &stats.course_titles {
            let lessons = kb
                .list_documents(Some(title))
                .await
                .iter()
                .filter(|d| d.section.is_some())
                .count();
            println!("    {:<50} {:>4} lessons", title, lessons);
        }
    }

    Ok(())
}
