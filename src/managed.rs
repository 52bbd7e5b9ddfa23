//! Managed retrieval corpus client.
//!
//! The managed strategy delegates indexing, retrieval, and answer synthesis
//! to an externally hosted corpus. [`ManagedRetrieval`] is the narrow
//! surface the orchestrator and the CLI see; [`HttpManagedClient`] speaks a
//! small REST protocol:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET`  | `/corpora/{id}` | Status: `{ "state": "ready", "file_count": 12 }` |
//! | `POST` | `/corpora/{id}/import` | Import documents by URI |
//! | `POST` | `/corpora/{id}/query` | Grounded answer plus passages |
//!
//! A missing or not-ready corpus surfaces as
//! [`RagError::CorpusUnavailable`], which sends the orchestrator to its
//! fallback strategy.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medrag_core::models::{snippet, Origin, Source};
use medrag_core::{RagError, RagResult};

use crate::config::{Config, ManagedConfig};
use crate::embedding::{status_error, transport_error};
use crate::ingest::Manifest;

const SERVICE: &str = "managed retrieval";

/// Confidence reported when the backend gives no grounding scores.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A grounded answer from the managed corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStatus {
    pub exists: bool,
    pub ready: bool,
    pub file_count: u64,
}

#[async_trait]
pub trait ManagedRetrieval: Send + Sync {
    /// Ask the backend to import and index documents. Administrative; not
    /// on the query path.
    async fn import_documents(
        &self,
        source_uris: &[String],
        chunk_size: usize,
        overlap: usize,
    ) -> RagResult<()>;

    async fn query(&self, question: &str, top_k: usize) -> RagResult<ManagedAnswer>;

    async fn check_status(&self) -> RagResult<CorpusStatus>;
}

/// Mean of the reported grounding confidences, or [`DEFAULT_CONFIDENCE`].
pub fn average_confidence(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    mean.clamp(0.0, 1.0)
}

// ============ Disabled ============

/// Used when `[managed].enabled = false`; every call is a corpus miss.
pub struct DisabledManaged;

#[async_trait]
impl ManagedRetrieval for DisabledManaged {
    async fn import_documents(&self, _: &[String], _: usize, _: usize) -> RagResult<()> {
        Err(RagError::CorpusUnavailable(
            "managed retrieval is disabled".into(),
        ))
    }

    async fn query(&self, _question: &str, _top_k: usize) -> RagResult<ManagedAnswer> {
        Err(RagError::CorpusUnavailable(
            "managed retrieval is disabled".into(),
        ))
    }

    async fn check_status(&self) -> RagResult<CorpusStatus> {
        Ok(CorpusStatus {
            exists: false,
            ready: false,
            file_count: 0,
        })
    }
}

// ============ HTTP ============

pub struct HttpManagedClient {
    client: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    state: String,
    #[serde(default)]
    file_count: u64,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    passages: Vec<Passage>,
}

#[derive(Deserialize)]
struct Passage {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl HttpManagedClient {
    pub fn new(config: &ManagedConfig) -> Result<Self> {
        let (Some(endpoint), Some(corpus)) = (&config.endpoint, &config.corpus) else {
            bail!("managed.endpoint and managed.corpus are required");
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/corpora/{}", endpoint.trim_end_matches('/'), corpus),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }

    fn request(&self, method: reqwest::Method, suffix: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base, suffix));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// 404 and 409 mean the corpus is missing or still indexing.
async fn classify_failure(response: reqwest::Response) -> RagError {
    match response.status().as_u16() {
        404 => RagError::CorpusUnavailable("managed corpus does not exist".into()),
        409 => RagError::CorpusUnavailable("managed corpus is not ready".into()),
        _ => status_error(SERVICE, response).await,
    }
}

fn into_answer(body: QueryResponse) -> RagResult<ManagedAnswer> {
    if body.answer.trim().is_empty() {
        return Err(RagError::external(SERVICE, "backend returned an empty answer"));
    }
    let scores: Vec<f64> = body.passages.iter().filter_map(|p| p.confidence).collect();
    let sources = body
        .passages
        .into_iter()
        .map(|p| Source {
            title: p.title.unwrap_or_else(|| "Managed corpus".to_string()),
            snippet: snippet(&p.text),
            origin: Origin::Managed,
            confidence: p.confidence,
            uri: p.uri,
        })
        .collect();
    Ok(ManagedAnswer {
        answer: body.answer,
        sources,
        confidence: average_confidence(&scores),
    })
}

#[async_trait]
impl ManagedRetrieval for HttpManagedClient {
    async fn import_documents(
        &self,
        source_uris: &[String],
        chunk_size: usize,
        overlap: usize,
    ) -> RagResult<()> {
        let body = serde_json::json!({
            "uris": source_uris,
            "chunking": { "size": chunk_size, "overlap": overlap },
        });
        let response = self
            .request(reqwest::Method::POST, "/import")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        tracing::info!(documents = source_uris.len(), "managed import accepted");
        Ok(())
    }

    async fn query(&self, question: &str, top_k: usize) -> RagResult<ManagedAnswer> {
        let body = serde_json::json!({ "question": question, "top_k": top_k });
        let response = self
            .request(reqwest::Method::POST, "/query")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        into_answer(parsed)
    }

    async fn check_status(&self) -> RagResult<CorpusStatus> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if response.status().as_u16() == 404 {
            return Ok(CorpusStatus {
                exists: false,
                ready: false,
                file_count: 0,
            });
        }
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        Ok(CorpusStatus {
            exists: true,
            ready: parsed.state.eq_ignore_ascii_case("ready"),
            file_count: parsed.file_count,
        })
    }
}

pub fn create_managed(config: &ManagedConfig) -> Result<Arc<dyn ManagedRetrieval>> {
    if config.enabled {
        Ok(Arc::new(HttpManagedClient::new(config)?))
    } else {
        Ok(Arc::new(DisabledManaged))
    }
}

/// `medrag managed import`: send every manifest document with a remote URI.
pub async fn run_import(config: &Config, manifest: &Path) -> Result<()> {
    let uris = Manifest::load(manifest)?.remote_uris();
    if uris.is_empty() {
        bail!("no documents in {} have storage.remote_uri", manifest.display());
    }
    let client = create_managed(&config.managed)?;
    client
        .import_documents(&uris, config.chunking.size, config.chunking.overlap)
        .await?;
    println!("Import of {} documents accepted.", uris.len());
    Ok(())
}

/// `medrag managed status`.
pub async fn run_status(config: &Config) -> Result<()> {
    let client = create_managed(&config.managed)?;
    let status = client.check_status().await?;
    println!("Managed corpus");
    println!("  Enabled: {}", config.managed.enabled);
    println!("  Exists:  {}", status.exists);
    println!("  Ready:   {}", status.ready);
    println!("  Files:   {}", status.file_count);
    Ok(())
}
