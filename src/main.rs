//! # Course RAG CLI (`crag`)
//!
//! Question answering over course documents from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag ingest [dir]` | Parse and index a folder of course files, print counts |
//! | `crag search "<query>"` | Retrieval only: print what the search tool would return |
//! | `crag ask "<question>"` | One question through the tool loop |
//! | `crag chat` | Interactive session with conversation history |
//! | `crag stats` | Course, document and chunk counts |
//! | `crag tools` | Tool specs offered to the model, as JSON |
//!
//! The index is in memory: every command that needs documents loads
//! `[docs].path` at start-up.
//!
//! ## Examples
//!
//! ```bash
//! # Search lesson 1 of a course, no API key needed
//! crag search "variables" --course python --lesson 1
//!
//! # Ask with the Anthropic provider
//! ANTHROPIC_API_KEY=... crag ask "What does lesson 1 of the Python course cover?"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use course_rag::config::{self, Config};
use course_rag::knowledge::KnowledgeBase;
use course_rag::rag::{knowledge_from_config, QueryResponse, RagSystem};
use course_rag::traits::ToolRegistry;
use course_rag::{loader, search, stats};

/// Course RAG CLI — retrieval-augmented question answering over course
/// materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Course RAG — question answering over chunked course documents",
    version,
    long_about = "Course RAG chunks and embeds course documents, and answers questions by \
    letting a language model call search and outline tools over them for a bounded number \
    of rounds."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`. A missing file at the default path
    /// means built-in defaults.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and index a folder of course files.
    ///
    /// Prints how many courses were added and how many chunks were
    /// created. Courses already loaded are skipped.
    Ingest {
        /// Folder to load. Defaults to `[docs].path`.
        dir: Option<PathBuf>,

        /// Clear the knowledge base before loading.
        #[arg(long)]
        clear: bool,
    },

    /// Search course content without a language model.
    Search {
        /// The search query string.
        query: String,

        /// Course name; partial and case-insensitive matches work.
        #[arg(long)]
        course: Option<String>,

        /// Lesson number within the course.
        #[arg(long)]
        lesson: Option<i64>,

        /// Maximum number of results. Defaults to `[retrieval].max_results`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask one question.
    Ask {
        question: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop sharing one session.
    Chat,

    /// Print knowledge base statistics.
    Stats,

    /// Print the tool specs offered to the model.
    Tools,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new("./config/rag.toml") {
        return Ok(Config::default());
    }
    config::load_config(path)
}

/// Load `[docs].path` if it exists; an absent folder means an empty base.
async fn load_docs(kb: &KnowledgeBase, cfg: &Config) -> Result<()> {
    if cfg.docs.path.exists() {
        loader::ingest_folder(kb, &cfg.docs.path, &cfg.docs, false).await?;
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &response.sources {
            match &source.link {
                Some(link) => println!("  - {} <{}>", source.label, link),
                None => println!("  - {}", source.label),
            }
        }
    }
}

/// Cancel `token` on Ctrl-C until the returned task is aborted.
fn cancel_on_ctrl_c(token: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

async fn run_chat(system: &RagSystem) -> Result<()> {
    let session_id = system.sessions().create_session().await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ask about the course materials. Empty line or Ctrl-D to quit.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        let token = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(&token);
        let result = system.query(question, Some(&session_id), Some(&token)).await;
        watcher.abort();

        match result {
            Ok(response) => print_response(&response),
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't need documents
    if let Commands::Tools = cli.command {
        let specs = ToolRegistry::with_builtins().tool_specs();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Ingest { dir, clear } => {
            let kb = knowledge_from_config(&cfg)?;
            let dir = dir.unwrap_or_else(|| cfg.docs.path.clone());
            let summary = loader::ingest_folder(&kb, &dir, &cfg.docs, clear).await?;
            println!(
                "Loaded {} courses with {} chunks from {}",
                summary.courses_added,
                summary.chunks_created,
                dir.display()
            );
        }
        Commands::Search {
            query,
            course,
            lesson,
            limit,
        } => {
            let kb = knowledge_from_config(&cfg)?;
            load_docs(&kb, &cfg).await?;
            let limit = limit.unwrap_or(cfg.retrieval.max_results);
            search::run_search(&kb, &query, course.as_deref(), lesson, limit).await?;
        }
        Commands::Stats => {
            let kb = knowledge_from_config(&cfg)?;
            load_docs(&kb, &cfg).await?;
            stats::run_stats(&kb).await?;
        }
        Commands::Ask {
            question,
            session,
            json,
        } => {
            let system = RagSystem::from_config(cfg.clone())?;
            load_docs(system.knowledge(), &cfg).await?;

            let token = CancellationToken::new();
            let watcher = cancel_on_ctrl_c(&token);
            let response = system
                .query(&question, session.as_deref(), Some(&token))
                .await;
            watcher.abort();
            let response = response?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Chat => {
            let system = RagSystem::from_config(cfg.clone())?;
            load_docs(system.knowledge(), &cfg).await?;
            run_chat(&system).await?;
        }
        Commands::Tools => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
