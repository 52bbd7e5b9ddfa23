//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping, fixed-size [`Chunk`]s.
//! Sizes and offsets are measured in characters (Unicode scalar values), so
//! multi-byte text never splits inside a character.
//!
//! Each chunk receives a deterministic UUID (v5) derived from its document
//! ID and index, plus a SHA-256 hash of its text for staleness detection.
//! Re-chunking identical text with identical options reproduces identical
//! boundaries and ids, which makes re-ingestion an idempotent upsert.
//!
//! # Algorithm
//!
//! 1. Reject texts shorter than `min_content_chars` as insufficient content.
//! 2. `start = 0`, `end = min(start + size, len)`; emit `text[start..end]`.
//! 3. Stop when `end == len`, otherwise `start = end - overlap` and repeat.
//!
//! For `len >= size` this produces `ceil((len - overlap) / (size - overlap))`
//! chunks.
//!
//! # Example
//!
//! ```rust
//! use medrag_core::chunk::{chunk_text, ChunkOptions};
//!
//! let text = "a".repeat(2000);
//! let chunks = chunk_text("doc-123", &text, &ChunkOptions::default()).unwrap();
//! assert_eq!(chunks.len(), 5);
//! assert_eq!(chunks[1].start_offset, 462);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, RagResult};
use crate::models::{Chunk, Document, DocumentMetadata};

/// Namespace for content-addressed chunk ids.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_6472_6167_4368_756e_6b49_6400_0001);

/// Page separator emitted by PDF text extraction.
const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Target chunk length in characters.
    pub size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// Documents with fewer trimmed characters are skipped.
    pub min_content_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            size: 512,
            overlap: 50,
            min_content_chars: 100,
        }
    }
}

impl ChunkOptions {
    pub fn validate(&self) -> RagResult<()> {
        if self.size == 0 {
            return Err(RagError::Validation("chunk size must be > 0".into()));
        }
        if self.overlap >= self.size {
            return Err(RagError::Validation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

/// Result of chunking one document.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Chunks(Vec<Chunk>),
    /// Too little text to be worth indexing; not an error.
    InsufficientContent { chars: usize },
}

/// Chunk a document's extracted text, copying its metadata onto every chunk.
pub fn chunk_document(doc: &Document, text: &str, opts: &ChunkOptions) -> RagResult<ChunkOutcome> {
    opts.validate()?;

    let trimmed_chars = text.trim().chars().count();
    if trimmed_chars < opts.min_content_chars {
        return Ok(ChunkOutcome::InsufficientContent {
            chars: trimmed_chars,
        });
    }

    let chunks = split_windows(text, opts)
        .into_iter()
        .enumerate()
        .map(|(index, window)| {
            let mut chunk = make_chunk(&doc.id, index as i64, &window);
            chunk.title = doc.title.clone();
            chunk.source = doc.source.clone();
            chunk.category = doc.category.clone();
            chunk.metadata = doc.metadata.clone();
            chunk
        })
        .collect();

    Ok(ChunkOutcome::Chunks(chunks))
}

/// Chunk raw text without document metadata.
///
/// Applies the same window as [`chunk_document`] but no minimum-length rule.
pub fn chunk_text(document_id: &str, text: &str, opts: &ChunkOptions) -> RagResult<Vec<Chunk>> {
    opts.validate()?;
    Ok(split_windows(text, opts)
        .into_iter()
        .enumerate()
        .map(|(index, window)| make_chunk(document_id, index as i64, &window))
        .collect())
}

/// Number of chunks the window produces for a text of `len` characters.
pub fn expected_chunk_count(len: usize, opts: &ChunkOptions) -> usize {
    if len == 0 {
        return 0;
    }
    if len <= opts.size {
        return 1;
    }
    let stride = opts.size - opts.overlap;
    (len - opts.overlap).div_ceil(stride)
}

/// Deterministic chunk id for `(document_id, chunk_index)`.
pub fn chunk_id(document_id: &str, chunk_index: i64) -> String {
    let name = format!("{}:{}", document_id, chunk_index);
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// SHA-256 hex digest of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Window {
    start: usize,
    end: usize,
    text: String,
    page_number: Option<u32>,
}

fn split_windows(text: &str, opts: &ChunkOptions) -> Vec<Window> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let has_pages = chars.contains(&PAGE_BREAK);

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < len {
        let end = (start + opts.size).min(len);
        let page_number = if has_pages {
            let breaks = chars[..start].iter().filter(|c| **c == PAGE_BREAK).count();
            Some(breaks as u32 + 1)
        } else {
            None
        };
        windows.push(Window {
            start,
            end,
            text: chars[start..end].iter().collect(),
            page_number,
        });
        if end == len {
            break;
        }
        start = end - opts.overlap;
    }
    windows
}

fn make_chunk(document_id: &str, index: i64, window: &Window) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        content: window.text.clone(),
        chunk_index: index,
        start_offset: window.start,
        end_offset: window.end,
        page_number: window.page_number,
        title: String::new(),
        source: String::new(),
        category: String::new(),
        metadata: DocumentMetadata::default(),
        hash: content_hash(&window.text),
    }
}
