//! Overlapping sentence/word-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s of at most `chunk_size`
//! characters, with consecutive windows overlapping by up to `overlap`
//! characters so that a fact spanning a boundary survives in at least one
//! chunk.
//!
//! All offsets are character offsets, never byte offsets, so multi-byte
//! UTF-8 input cannot be split inside a code point.
//!
//! # Algorithm
//!
//! 1. Open a window `[start, start + chunk_size)` clamped to the text length.
//! 2. Unless the window reaches the end of the text, scan backward from the
//!    right edge to the nearest boundary character (space, newline, `.`,
//!    `!`, `?`). If the scan reaches `start`, keep the raw cut.
//! 3. Trim whitespace; an empty window produces no chunk.
//! 4. Stop once a window reaches the end of the text; otherwise the next
//!    start is `max(start + 1, end - overlap)`, which guarantees progress
//!    even when `overlap >= chunk_size`.
//!
//! Each chunk gets a deterministic UUIDv5 derived from its document ID and
//! index, plus a SHA-256 hash of its text.
//!
//! # Example
//!
//! ```rust
//! use course_rag_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Python variables store data values.", 800, 100);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::models::{CharSpan, Chunk, Metadata};

/// Characters a window may end on.
const BOUNDARY_CHARS: [char; 5] = [' ', '\n', '.', '!', '?'];

/// Split `text` into overlapping chunks.
///
/// Returns chunks with contiguous indices starting at 0. Whitespace-only
/// or empty text yields no chunks. Identical inputs always yield identical
/// output, including chunk IDs.
///
/// A `chunk_size` of 0 is treated as 1; configuration loading rejects it
/// before it gets here.
pub fn chunk_text(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let size = chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + size).min(len);

        if end < len {
            let mut cut = end;
            while cut > start && !BOUNDARY_CHARS.contains(&chars[cut]) {
                cut -= 1;
            }
            if cut == start {
                warn!(
                    document_id,
                    start, end, "no boundary character in window, cutting mid-word"
                );
            } else {
                end = cut;
            }
        }

        if let Some(span) = trimmed_span(&chars, start, end) {
            let piece: String = chars[span.start..span.end].iter().collect();
            chunks.push(make_chunk(document_id, chunks.len() as i64, piece, span));
        }

        if end >= len {
            break;
        }
        start = (start + 1).max(end.saturating_sub(overlap));
    }

    chunks
}

/// Shrink `[start, end)` past leading and trailing whitespace.
fn trimmed_span(chars: &[char], mut start: usize, mut end: usize) -> Option<CharSpan> {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    if start == end {
        None
    } else {
        Some(CharSpan { start, end })
    }
}

/// Deterministic chunk ID for `(document_id, index)`.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    let name = format!("{}:{}", document_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 hex digest of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: i64, text: String, span: CharSpan) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert("start_pos".to_string(), span.start.into());
    metadata.insert("end_pos".to_string(), span.end.into());
    metadata.insert("chunk_length".to_string(), span.len().into());

    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        hash: content_hash(&text),
        text,
        char_span: span,
        metadata,
    }
}
