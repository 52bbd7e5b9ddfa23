//! Core data models used throughout medrag.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and serving paths.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a document's bytes can be found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageLocations {
    /// Local file path, used by the ingestion extractor.
    #[serde(default)]
    pub local_path: Option<String>,
    /// Remote object URI, used for managed-corpus imports.
    #[serde(default)]
    pub remote_uri: Option<String>,
}

/// Descriptive metadata copied onto every chunk of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub audience: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            audience: Vec::new(),
            language: default_language(),
            region: None,
            topics: Vec::new(),
            last_updated: None,
        }
    }
}

/// A source document, as listed in an ingestion manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub storage: StorageLocations,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// A bounded span of a document's text, before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from `document_id` and `chunk_index`.
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i64,
    /// Character offset of the first character (inclusive).
    pub start_offset: usize,
    /// Character offset past the last character (exclusive).
    pub end_offset: usize,
    pub page_number: Option<u32>,
    pub title: String,
    pub source: String,
    pub category: String,
    pub metadata: DocumentMetadata,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub embedding_dim: usize,
}

impl VectorChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        let embedding_dim = embedding.len();
        Self {
            chunk,
            embedding,
            embedding_dim,
        }
    }
}

/// A stored chunk with its similarity to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Singleton aggregate describing the indexed corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    /// Corpus generation; bumped whenever the embedding model or dimensions change.
    pub version: i64,
    pub embedding_model: String,
    pub dimensions: usize,
    pub total_documents: i64,
    pub total_chunks: i64,
    pub updated_at: DateTime<Utc>,
}

/// Retrieval strategy selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Externally hosted, externally indexed corpus.
    Managed,
    /// Local vector store plus answer generation.
    Custom,
    /// Both of the above, merged.
    Hybrid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Managed => "managed",
            Strategy::Custom => "custom",
            Strategy::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Who is asking. Drives routing adjustments and prompt tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Patient,
    Professional,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => f.write_str("patient"),
            Role::Professional => f.write_str("professional"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "professional" => Ok(Role::Professional),
            other => Err(format!(
                "unknown role '{}'; expected patient or professional",
                other
            )),
        }
    }
}

/// Router output for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub strategy: Strategy,
    pub confidence: f64,
    pub reasoning: String,
}

/// Which subsystem produced a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Managed,
    Custom,
}

/// A citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub snippet: String,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Uniform result of a query, whichever strategies ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub sources: Vec<Source>,
    pub strategy_used: Strategy,
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub fallback_used: bool,
}

/// A per-document failure recorded by a batch ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentError {
    pub document_id: String,
    pub message: String,
}

/// Outcome of a batch ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    /// Documents that completed, including skipped ones.
    pub processed: usize,
    pub failed: usize,
    /// Documents skipped for insufficient content.
    pub skipped: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<DocumentError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Number of characters kept in snippets.
pub const SNIPPET_CHARS: usize = 240;

/// Truncate text to a display snippet on a character boundary.
pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}
