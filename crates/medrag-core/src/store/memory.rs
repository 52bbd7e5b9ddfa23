//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{CorpusMetadata, ScoredChunk, VectorChunk};
use crate::similarity::rank_top_k;

use super::{check_dimensions, next_version, SearchFilter, VectorStore};

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<HashMap<String, VectorChunk>>,
    metadata: RwLock<Option<CorpusMetadata>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunk records.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert_chunks(&self, chunks: &[VectorChunk]) -> Result<usize> {
        let corpus_dims = self
            .metadata
            .read()
            .map_err(poisoned)?
            .as_ref()
            .filter(|m| m.total_chunks > 0)
            .map(|m| m.dimensions);
        check_dimensions(chunks, corpus_dims)?;

        let mut stored = self.chunks.write().map_err(poisoned)?;
        for vc in chunks {
            stored.insert(vc.chunk.id.clone(), vc.clone());
        }
        Ok(chunks.len())
    }

    async fn prune_document(&self, document_id: &str, keep_chunks: usize) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, vc| {
            vc.chunk.document_id != document_id || (vc.chunk.chunk_index as usize) < keep_chunks
        });
        Ok(before - stored.len())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let candidates = stored
            .values()
            .filter(|vc| filter.map_or(true, |f| f.matches(&vc.chunk.category)))
            .map(|vc| (&vc.chunk, vc.embedding.as_slice()));
        Ok(rank_top_k(query, candidates, k))
    }

    async fn corpus_metadata(&self) -> Result<Option<CorpusMetadata>> {
        Ok(self.metadata.read().map_err(poisoned)?.clone())
    }

    async fn refresh_corpus_metadata(&self, model: &str, dims: usize) -> Result<CorpusMetadata> {
        let (total_documents, total_chunks) = {
            let stored = self.chunks.read().map_err(poisoned)?;
            let docs: HashSet<&str> = stored
                .values()
                .map(|vc| vc.chunk.document_id.as_str())
                .collect();
            (docs.len() as i64, stored.len() as i64)
        };

        let mut meta = self.metadata.write().map_err(poisoned)?;
        let updated = CorpusMetadata {
            version: next_version(meta.as_ref(), model, dims),
            embedding_model: model.to_string(),
            dimensions: dims,
            total_documents,
            total_chunks,
            updated_at: Utc::now(),
        };
        *meta = Some(updated.clone());
        Ok(updated)
    }
}
