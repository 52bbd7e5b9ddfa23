//! Text extraction for source documents, with an OCR fallback.
//!
//! Extraction is the first ingestion stage: a document's bytes (a local
//! file, an in-memory buffer, or inline text from the manifest) become plain
//! UTF-8 text for the chunker.
//!
//! Scanned PDFs often extract to nothing. [`extract_with_fallback`] hands
//! those, and anything the primary extractor fails on, to an [`OcrEngine`]
//! before giving up on the document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use medrag_core::{RagError, RagResult};

use crate::config::OcrConfig;
use crate::embedding::{status_error, transport_error};
use crate::retry::with_timeout;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Where a document's content comes from.
#[derive(Debug, Clone)]
pub enum ExtractSource {
    /// Text supplied inline, used as-is.
    Text(String),
    /// A local file; the content type is inferred from the extension.
    File(PathBuf),
    Bytes { bytes: Vec<u8>, content_type: String },
}

impl ExtractSource {
    fn describe(&self) -> String {
        match self {
            ExtractSource::Text(_) => "inline text".to_string(),
            ExtractSource::File(p) => p.display().to_string(),
            ExtractSource::Bytes { content_type, .. } => format!("{} buffer", content_type),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Extract plain text from bytes of a known content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map_err(|e| ExtractError::Encoding(e.to_string())),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Infer a content type from a file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => MIME_PDF,
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, source: &ExtractSource) -> Result<String>;
}

/// Reads local files and buffers; PDFs go through `pdf-extract`.
pub struct FileExtractor;

#[async_trait]
impl TextExtractor for FileExtractor {
    async fn extract(&self, source: &ExtractSource) -> Result<String> {
        let (bytes, content_type) = match source {
            ExtractSource::Text(text) => return Ok(text.clone()),
            ExtractSource::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                (bytes, content_type_for(path).to_string())
            }
            ExtractSource::Bytes {
                bytes,
                content_type,
            } => (bytes.clone(), content_type.clone()),
        };

        // pdf-extract is CPU-bound and synchronous.
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type))
            .await
            .context("extraction task panicked")??;
        Ok(text)
    }
}

/// Optical character recognition collaborator.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(&self, source: &ExtractSource) -> RagResult<String>;
}

/// OCR placeholder used when no engine is configured.
pub struct NoOcr;

#[async_trait]
impl OcrEngine for NoOcr {
    fn is_available(&self) -> bool {
        false
    }

    async fn recognize(&self, _source: &ExtractSource) -> RagResult<String> {
        Err(RagError::Validation("no OCR engine configured".into()))
    }
}

/// OCR over HTTP: the raw file is POSTed and `{"text": "..."}` comes back.
pub struct HttpOcr {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(&self, source: &ExtractSource) -> RagResult<String> {
        let (bytes, content_type) = match source {
            ExtractSource::Text(_) => {
                return Err(RagError::Validation("inline text cannot be OCR'd".into()))
            }
            ExtractSource::File(path) => (
                tokio::fs::read(path)
                    .await
                    .map_err(|e| RagError::Validation(format!("{}: {}", path.display(), e)))?,
                content_type_for(path).to_string(),
            ),
            ExtractSource::Bytes {
                bytes,
                content_type,
            } => (bytes.clone(), content_type.clone()),
        };

        let request = async {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", content_type)
                .body(bytes)
                .send()
                .await
                .map_err(|e| transport_error("ocr", e))?;
            if !response.status().is_success() {
                return Err(status_error("ocr", response).await);
            }
            let body: OcrResponse = response
                .json()
                .await
                .map_err(|e| transport_error("ocr", e))?;
            Ok::<String, RagError>(body.text)
        };
        with_timeout("ocr", self.timeout, request).await
    }
}

/// Build the configured OCR engine.
pub fn create_ocr(config: &OcrConfig) -> Result<Box<dyn OcrEngine>> {
    match &config.endpoint {
        Some(endpoint) => {
            let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(120));
            Ok(Box::new(HttpOcr::new(endpoint.clone(), timeout)?))
        }
        None => Ok(Box::new(NoOcr)),
    }
}

/// Extracted text and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub used_ocr: bool,
}

/// Extract text, falling back to OCR when the primary extractor fails or
/// returns fewer than `min_chars` meaningful characters.
///
/// A short primary result is returned unchanged when OCR is unavailable or
/// does no better; the chunker then reports the document as insufficient.
/// A primary failure with no usable OCR result is an error.
pub async fn extract_with_fallback(
    extractor: &dyn TextExtractor,
    ocr: &dyn OcrEngine,
    source: &ExtractSource,
    min_chars: usize,
) -> Result<Extracted> {
    let primary = extractor.extract(source).await;

    let primary_chars = match &primary {
        Ok(text) => {
            let chars = text.trim().chars().count();
            if chars >= min_chars {
                return Ok(Extracted {
                    text: text.clone(),
                    used_ocr: false,
                });
            }
            chars
        }
        Err(_) => 0,
    };

    if ocr.is_available() && !matches!(source, ExtractSource::Text(_)) {
        tracing::info!(
            source = %source.describe(),
            primary_chars,
            "primary extraction insufficient, trying OCR"
        );
        match ocr.recognize(source).await {
            Ok(text) if text.trim().chars().count() > primary_chars => {
                return Ok(Extracted {
                    text,
                    used_ocr: true,
                });
            }
            Ok(_) => tracing::warn!(source = %source.describe(), "OCR produced no additional text"),
            Err(e) => tracing::warn!(source = %source.describe(), error = %e, "OCR failed"),
        }
    }

    primary
        .map(|text| Extracted {
            text,
            used_ocr: false,
        })
        .with_context(|| format!("Failed to extract text from {}", source.describe()))
}
