//! Ingestion pipeline.
//!
//! Coordinates the full flow for each document:
//! extraction (+OCR) → chunking → batched embedding → vector store upsert →
//! corpus metadata refresh.
//!
//! Documents in a batch job are processed sequentially with a fixed pause
//! between them. A failure is recorded against its document and the job
//! moves on; it never aborts the batch. Because chunk ids are derived from
//! `(document_id, chunk_index)` and upserts are idempotent, re-running a job
//! converges on the same stored state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use medrag_core::chunk::{chunk_document, ChunkOptions, ChunkOutcome};
use medrag_core::embedding::estimate_tokens;
use medrag_core::models::{Document, DocumentError, JobSummary, VectorChunk};
use medrag_core::store::VectorStore;
use medrag_core::{RagError, RagResult};

use crate::config::Config;
use crate::embedding::batch::BatchEmbedder;
use crate::extract::{extract_with_fallback, ExtractSource, OcrEngine, TextExtractor};
use crate::services::Services;

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks_indexed: usize,
    /// Stale chunks removed because the document got shorter.
    pub chunks_pruned: usize,
    /// Set when the document had too little text to index.
    pub insufficient_content: Option<usize>,
    pub used_ocr: bool,
}

/// What a dry run would do with one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPlan {
    pub document_id: String,
    pub chars: usize,
    pub chunks: usize,
    pub estimated_tokens: usize,
}

pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<BatchEmbedder>,
    extractor: Arc<dyn TextExtractor>,
    ocr: Arc<dyn OcrEngine>,
    chunking: ChunkOptions,
    document_delay: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<BatchEmbedder>,
        extractor: Arc<dyn TextExtractor>,
        ocr: Arc<dyn OcrEngine>,
        chunking: ChunkOptions,
        document_delay: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            ocr,
            chunking,
            document_delay,
        }
    }

    /// Extract, chunk, embed, and store one document.
    ///
    /// Too little text is reported through
    /// [`IngestOutcome::insufficient_content`], not as an error, and any
    /// chunks previously stored for the document are removed. Any
    /// embedding failure (after retries) fails the whole document and
    /// nothing is written for it.
    pub async fn ingest_document(
        &self,
        doc: &Document,
        source: &ExtractSource,
    ) -> RagResult<IngestOutcome> {
        let extracted = extract_with_fallback(
            self.extractor.as_ref(),
            self.ocr.as_ref(),
            source,
            self.chunking.min_content_chars,
        )
        .await
        .map_err(|e| RagError::PipelineDocument {
            document_id: doc.id.clone(),
            message: format!("{:#}", e),
        })?;

        let chunks = match chunk_document(doc, &extracted.text, &self.chunking)? {
            ChunkOutcome::Chunks(chunks) => chunks,
            ChunkOutcome::InsufficientContent { chars } => {
                tracing::info!(document = %doc.id, chars, "insufficient content, skipping");
                // Chunks from an earlier, longer version no longer describe the document.
                let pruned = self.store.prune_document(&doc.id, 0).await?;
                if pruned > 0 {
                    self.store
                        .refresh_corpus_metadata(self.embedder.model_name(), self.embedder.dims())
                        .await?;
                    tracing::info!(document = %doc.id, pruned, "dropped stale chunks");
                }
                return Ok(IngestOutcome {
                    document_id: doc.id.clone(),
                    chunks_indexed: 0,
                    chunks_pruned: pruned,
                    insufficient_content: Some(chars),
                    used_ocr: extracted.used_ocr,
                });
            }
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_all(&texts).await?;

        let records: Vec<VectorChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| VectorChunk::new(chunk, embedding))
            .collect();

        let written = self.store.upsert_chunks(&records).await?;
        let pruned = self.store.prune_document(&doc.id, records.len()).await?;
        let meta = self
            .store
            .refresh_corpus_metadata(self.embedder.model_name(), self.embedder.dims())
            .await?;

        tracing::info!(
            document = %doc.id,
            chunks = written,
            pruned,
            used_ocr = extracted.used_ocr,
            corpus_chunks = meta.total_chunks,
            "document indexed"
        );

        Ok(IngestOutcome {
            document_id: doc.id.clone(),
            chunks_indexed: written,
            chunks_pruned: pruned,
            insufficient_content: None,
            used_ocr: extracted.used_ocr,
        })
    }

    /// Ingest many documents, continuing past per-document failures.
    pub async fn ingest_batch(&self, items: &[(Document, ExtractSource)]) -> JobSummary {
        let job_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut summary = JobSummary {
            job_id: job_id.clone(),
            processed: 0,
            failed: 0,
            skipped: 0,
            chunks_indexed: 0,
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        tracing::info!(job = %job_id, documents = items.len(), "ingestion job started");

        for (i, (doc, source)) in items.iter().enumerate() {
            if i > 0 && !self.document_delay.is_zero() {
                tokio::time::sleep(self.document_delay).await;
            }

            match self.ingest_document(doc, source).await {
                Ok(outcome) => {
                    summary.processed += 1;
                    summary.chunks_indexed += outcome.chunks_indexed;
                    if outcome.insufficient_content.is_some() {
                        summary.skipped += 1;
                    }
                }
                Err(err) => {
                    tracing::error!(job = %job_id, document = %doc.id, error = %err, "document failed");
                    summary.failed += 1;
                    summary.errors.push(DocumentError {
                        document_id: doc.id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        summary.finished_at = Utc::now();
        tracing::info!(
            job = %job_id,
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            chunks = summary.chunks_indexed,
            "ingestion job finished"
        );
        summary
    }

    /// Extract and chunk without embedding or writing anything.
    pub async fn plan_document(&self, doc: &Document, source: &ExtractSource) -> Result<DocumentPlan> {
        let extracted = extract_with_fallback(
            self.extractor.as_ref(),
            self.ocr.as_ref(),
            source,
            self.chunking.min_content_chars,
        )
        .await?;
        let chars = extracted.text.chars().count();
        let (chunks, estimated_tokens) = match chunk_document(doc, &extracted.text, &self.chunking)?
        {
            ChunkOutcome::Chunks(chunks) => (
                chunks.len(),
                chunks.iter().map(|c| estimate_tokens(&c.content)).sum(),
            ),
            ChunkOutcome::InsufficientContent { .. } => (0, 0),
        };
        Ok(DocumentPlan {
            document_id: doc.id.clone(),
            chars,
            chunks,
            estimated_tokens,
        })
    }
}

// ============ Manifest ============

/// A batch of documents to ingest, read from TOML.
///
/// ```toml
/// [[documents]]
/// id = "who-malaria-2023"
/// title = "WHO Guidelines for Malaria"
/// source = "WHO"
/// category = "guidelines"
/// path = "docs/who-malaria-2023.pdf"
///
/// [documents.metadata]
/// audience = ["professional"]
/// region = "zambia"
/// ```
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub documents: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub document: Document,
    /// File to extract, relative to the manifest.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Inline text, used instead of a file.
    #[serde(default)]
    pub text: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let manifest: Manifest = toml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        if manifest.documents.is_empty() {
            bail!("manifest {} lists no documents", path.display());
        }
        Ok(manifest)
    }

    /// Resolve every entry to a document and its content source.
    ///
    /// Relative paths are resolved against `base_dir`. An entry without
    /// `text`, `path`, or `storage.local_path` is an error.
    pub fn resolve(self, base_dir: &Path) -> Result<Vec<(Document, ExtractSource)>> {
        let mut seen = std::collections::HashSet::new();
        let mut items = Vec::with_capacity(self.documents.len());

        for entry in self.documents {
            let mut doc = entry.document;
            if !seen.insert(doc.id.clone()) {
                bail!("duplicate document id in manifest: {}", doc.id);
            }

            let source = if let Some(text) = entry.text {
                ExtractSource::Text(text)
            } else {
                let rel = entry
                    .path
                    .or_else(|| doc.storage.local_path.as_ref().map(PathBuf::from))
                    .with_context(|| {
                        format!("document {} needs `text`, `path`, or storage.local_path", doc.id)
                    })?;
                let full = if rel.is_absolute() {
                    rel
                } else {
                    base_dir.join(rel)
                };
                doc.storage.local_path = Some(full.display().to_string());
                ExtractSource::File(full)
            };
            items.push((doc, source));
        }
        Ok(items)
    }

    /// Remote URIs of every document that has one, for managed-corpus import.
    pub fn remote_uris(&self) -> Vec<String> {
        self.documents
            .iter()
            .filter_map(|e| e.document.storage.remote_uri.clone())
            .collect()
    }
}

/// Load and resolve a manifest file.
pub fn load_manifest(path: &Path) -> Result<Vec<(Document, ExtractSource)>> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    Manifest::load(path)?.resolve(base_dir)
}

/// `medrag ingest`: run a batch job over a manifest and print its summary.
pub async fn run_ingest(config: &Config, manifest: &Path, dry_run: bool) -> Result<()> {
    let items = load_manifest(manifest)?;
    let services = Services::from_config(config).await?;

    if dry_run {
        println!("Dry run: {} documents", items.len());
        let mut total_chunks = 0usize;
        let mut total_tokens = 0usize;
        for (doc, source) in &items {
            match services.ingestor.plan_document(doc, source).await {
                Ok(plan) => {
                    println!(
                        "  {:<32} {:>8} chars {:>5} chunks {:>8} tokens",
                        plan.document_id, plan.chars, plan.chunks, plan.estimated_tokens
                    );
                    total_chunks += plan.chunks;
                    total_tokens += plan.estimated_tokens;
                }
                Err(e) => println!("  {:<32} error: {:#}", doc.id, e),
            }
        }
        println!("  Total: {} chunks, ~{} tokens", total_chunks, total_tokens);
        return Ok(());
    }

    let summary = services.ingestor.ingest_batch(&items).await;
    services.store.record_job(&summary).await?;

    println!("Ingestion job {}", summary.job_id);
    println!("  Processed: {}", summary.processed);
    println!("  Skipped:   {} (insufficient content)", summary.skipped);
    println!("  Failed:    {}", summary.failed);
    println!("  Chunks:    {}", summary.chunks_indexed);
    for err in &summary.errors {
        println!("  ! {}: {}", err.document_id, err.message);
    }

    if summary.failed > 0 && summary.processed == 0 {
        bail!("all {} documents failed", summary.failed);
    }
    Ok(())
}
