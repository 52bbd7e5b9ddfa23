//! Error taxonomy for the retrieval engine.
//!
//! Every failure that crosses a collaborator boundary (embedding model,
//! managed corpus, answer generator, storage) is mapped onto a [`RagError`]
//! variant. The variant decides what happens next: retryable errors are
//! retried with backoff, validation errors fail fast, and corpus errors send
//! the orchestrator down its fallback path.

use std::time::Duration;

use thiserror::Error;

/// Result alias used by the collaborator traits.
pub type RagResult<T> = Result<T, RagError>;

#[derive(Debug, Clone, Error)]
pub enum RagError {
    /// Input rejected before any external call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// One or more items exceed the per-item token limit.
    #[error("{} chunk(s) exceed the per-item limit of {limit} tokens (indices {indices:?})", .indices.len())]
    OversizedChunks { indices: Vec<usize>, limit: usize },

    /// Timeout, rate limit, server error, or network failure.
    #[error("{service} temporarily unavailable: {message}")]
    TransientExternal { service: String, message: String },

    /// The backend rejected the request and retrying will not help.
    #[error("{service} rejected the request: {message}")]
    External { service: String, message: String },

    /// The corpus behind a retrieval strategy is missing, not ready, or empty.
    #[error("corpus unavailable: {0}")]
    CorpusUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single document failed during a batch ingestion job.
    #[error("document {document_id} failed: {message}")]
    PipelineDocument {
        document_id: String,
        message: String,
    },

    /// Both the primary strategy and its fallback failed.
    #[error("all retrieval strategies failed (primary: {primary}; fallback: {fallback})")]
    HybridExhaustion { primary: String, fallback: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::TransientExternal {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::External {
            service: service.into(),
            message: message.into(),
        }
    }

    /// A call that did not complete within its deadline.
    pub fn timeout(service: impl Into<String>, after: Duration) -> Self {
        RagError::TransientExternal {
            service: service.into(),
            message: format!("timed out after {} ms", after.as_millis()),
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::TransientExternal { .. })
    }

    /// Map an HTTP status code onto the retry taxonomy.
    ///
    /// 429 and 5xx are transient; every other non-success status is final.
    pub fn from_status(service: &str, status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        if status == 429 || (500..600).contains(&status) {
            RagError::transient(service, message)
        } else {
            RagError::external(service, message)
        }
    }
}

impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Storage(format!("{:#}", err))
    }
}
