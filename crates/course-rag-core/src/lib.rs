//! # course-rag core
//!
//! Runtime-agnostic pieces of the course-rag pipeline: data models,
//! overlapping chunker, vector index abstraction, retrieval (name
//! resolution, filtering, formatting, source dedup) and the embedding
//! trait.
//!
//! This crate carries no tokio, HTTP, or filesystem dependencies. The
//! application crate supplies concrete embedders, the language model, and
//! the orchestration loop.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;
