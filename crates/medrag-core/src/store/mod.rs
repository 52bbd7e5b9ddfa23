//! Storage abstraction for indexed chunks.
//!
//! The [`VectorStore`] trait is the only surface the ingestion pipeline and
//! the orchestrator see, so the exact brute-force search used today can be
//! swapped for an approximate index without touching callers.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{CorpusMetadata, ScoredChunk, VectorChunk};

/// Optional restriction applied before similarity scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only score chunks from documents in this category.
    pub category: Option<String>,
}

impl SearchFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
        }
    }

    pub fn matches(&self, category: &str) -> bool {
        self.category.as_deref().map_or(true, |c| c == category)
    }
}

/// Abstract chunk store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_chunks`](VectorStore::upsert_chunks) | Idempotent insert-or-replace keyed by chunk id |
/// | [`prune_document`](VectorStore::prune_document) | Drop chunks beyond a document's current count |
/// | [`search`](VectorStore::search) | Top-K similarity search |
/// | [`corpus_metadata`](VectorStore::corpus_metadata) | Read the corpus aggregate |
/// | [`refresh_corpus_metadata`](VectorStore::refresh_corpus_metadata) | Recompute the aggregate |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks. Returns the number of records written.
    ///
    /// Records whose embedding length disagrees with `embedding_dim`, or
    /// with the current corpus generation, are rejected.
    async fn upsert_chunks(&self, chunks: &[VectorChunk]) -> Result<usize>;

    /// Delete chunks of `document_id` whose index is `>= keep_chunks`.
    ///
    /// Used after re-ingesting a document that became shorter. Returns the
    /// number of deleted records.
    async fn prune_document(&self, document_id: &str, keep_chunks: usize) -> Result<usize>;

    /// Return the `k` most similar chunks, best first.
    ///
    /// An empty store yields an empty list.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>>;

    async fn corpus_metadata(&self) -> Result<Option<CorpusMetadata>>;

    /// Recompute document and chunk totals from the stored chunks and
    /// record the embedding model. Bumps `version` when the model or
    /// dimensions differ from the previous generation.
    async fn refresh_corpus_metadata(&self, model: &str, dims: usize) -> Result<CorpusMetadata>;
}

/// Check the dimension invariant for a batch of records.
///
/// Every record must satisfy `embedding.len() == embedding_dim`, all records
/// must share one dimension, and that dimension must match `corpus_dims`
/// when a corpus generation already exists.
pub fn check_dimensions(chunks: &[VectorChunk], corpus_dims: Option<usize>) -> Result<()> {
    let mut batch_dims: Option<usize> = None;
    for vc in chunks {
        if vc.embedding.len() != vc.embedding_dim {
            bail!(
                "chunk {} has embedding of length {} but embedding_dim {}",
                vc.chunk.id,
                vc.embedding.len(),
                vc.embedding_dim
            );
        }
        match batch_dims {
            None => batch_dims = Some(vc.embedding_dim),
            Some(d) if d != vc.embedding_dim => bail!(
                "mixed embedding dimensions in one upsert ({} and {})",
                d,
                vc.embedding_dim
            ),
            Some(_) => {}
        }
    }
    if let (Some(expected), Some(actual)) = (corpus_dims, batch_dims) {
        if expected != actual {
            bail!(
                "embedding dimension {} does not match corpus dimension {}; rebuild the corpus to change models",
                actual,
                expected
            );
        }
    }
    Ok(())
}

/// Next corpus version given the previous aggregate and the current model.
pub fn next_version(previous: Option<&CorpusMetadata>, model: &str, dims: usize) -> i64 {
    match previous {
        None => 1,
        Some(p) if p.embedding_model != model || p.dimensions != dims => p.version + 1,
        Some(p) => p.version,
    }
}
