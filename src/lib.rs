//! # Course RAG
//!
//! Retrieval-augmented question answering over chunked course documents.
//!
//! A language model answers each question in a bounded number of rounds.
//! In each round it may call retrieval tools (semantic search with fuzzy
//! course-name matching, course outlines) and read their results before
//! answering.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Loader    │──▶│  Knowledge  │──▶│ VectorIndex  │
//! │ course files│   │ Chunk+Embed │   │  (in-memory) │
//! └─────────────┘   └──────┬──────┘   └──────────────┘
//!                          │ search / outline
//!                   ┌──────┴──────┐   ┌──────────────┐
//!                   │ ToolRegistry│◀──│ Orchestrator │◀── question
//!                   └─────────────┘   └──────┬───────┘
//!                                            ▼
//!                                     LanguageModel
//! ```
//!
//! Chunking, the vector index trait and the retriever live in the
//! `course-rag-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Course catalog and document inputs |
//! | [`embedding`] | Embedding providers |
//! | [`knowledge`] | Document and course catalog ownership |
//! | [`loader`] | Course file parsing and folder ingestion |
//! | [`llm`] | Language model providers |
//! | [`traits`] | Tool trait, registry and built-in tools |
//! | [`orchestrator`] | Bounded tool-calling loop |
//! | [`session`] | Conversation history |
//! | [`rag`] | Facade tying it together |
//! | [`error`] | Query error taxonomy |

pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod rag;
pub mod search;
pub mod session;
pub mod stats;
pub mod traits;
