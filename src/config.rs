//! Configuration parsing and validation.
//!
//! medrag is configured via a TOML file (default: `config/medrag.toml`).
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/medrag.sqlite"
//!
//! [chunking]
//! size = 512
//! overlap = 50
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [managed]
//! enabled = true
//! endpoint = "https://retrieval.example.org/v1"
//! corpus = "medical-guidelines"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects:
//! - `chunking.size == 0` or `chunking.overlap >= chunking.size`
//! - `retrieval.top_k < 1`
//! - an enabled embedding provider without `model` and `dims > 0`
//! - an enabled managed corpus without `endpoint` and `corpus`
//! - unknown provider names

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use medrag_core::batch::BatchLimits;
use medrag_core::chunk::ChunkOptions;
use medrag_core::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub managed: ManagedConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Sliding-window chunking, in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Documents with less extracted text than this are skipped.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_overlap(),
            min_content_chars: default_min_content_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            size: self.size,
            overlap: self.overlap,
            min_content_chars: self.min_content_chars,
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}
fn default_min_content_chars() -> usize {
    100
}

/// Embedding provider, batching, rate limiting, and retry settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_items_per_batch")]
    pub max_items_per_batch: usize,
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,
    #[serde(default = "default_max_item_tokens")]
    pub max_item_tokens: usize,
    /// Pause between consecutive sub-batch calls.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Attempts per sub-batch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            max_items_per_batch: default_max_items_per_batch(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            max_item_tokens: default_max_item_tokens(),
            batch_delay_ms: default_batch_delay_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.max_items_per_batch,
            max_batch_tokens: self.max_tokens_per_batch,
            max_item_tokens: self.max_item_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        backoff_policy(self.max_attempts, self.initial_backoff_ms, self.max_backoff_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn backoff_policy(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(initial_backoff_ms),
        max_backoff: Duration::from_millis(max_backoff_ms),
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_items_per_batch() -> usize {
    100
}
fn default_max_tokens_per_batch() -> usize {
    20_000
}
fn default_max_item_tokens() -> usize {
    8_000
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    32_000
}
fn default_timeout_secs() -> u64 {
    30
}

/// Serving-time retrieval settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks retrieved from the local store per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Passages requested from the managed corpus per query.
    #[serde(default = "default_top_k")]
    pub managed_top_k: usize,
    /// Restrict local search to one document category.
    #[serde(default)]
    pub category: Option<String>,
    /// Queries shorter than this (trimmed, in characters) are rejected.
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    /// Upper bound on a whole strategy execution.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            managed_top_k: default_top_k(),
            category: None,
            min_query_chars: default_min_query_chars(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_query_chars() -> usize {
    3
}
fn default_query_timeout_secs() -> u64 {
    60
}

/// Externally hosted retrieval corpus.
#[derive(Debug, Deserialize, Clone)]
pub struct ManagedConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub corpus: Option<String>,
    #[serde(default = "default_managed_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            corpus: None,
            api_key_env: default_managed_key_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ManagedConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        backoff_policy(self.max_attempts, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

fn default_managed_key_env() -> String {
    "MEDRAG_MANAGED_API_KEY".to_string()
}

/// Answer generator used by the custom strategy and hybrid synthesis.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_openai_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        backoff_policy(self.max_attempts, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

fn default_max_tokens() -> u32 {
    800
}
fn default_temperature() -> f32 {
    0.2
}

/// OCR fallback for scanned documents.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OcrConfig {
    /// Endpoint that accepts raw file bytes and returns `{"text": "..."}`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Batch ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Pause between documents in a batch job.
    #[serde(default = "default_document_delay_ms")]
    pub document_delay_ms: u64,
    /// Maximum records per store write transaction.
    #[serde(default = "default_write_batch_limit")]
    pub write_batch_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            document_delay_ms: default_document_delay_ms(),
            write_batch_limit: default_write_batch_limit(),
        }
    }
}

fn default_document_delay_ms() -> u64 {
    1_000
}
fn default_write_batch_limit() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 || config.retrieval.managed_top_k < 1 {
        bail!("retrieval.top_k and retrieval.managed_top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.max_items_per_batch == 0 {
            bail!("embedding.max_items_per_batch must be > 0");
        }
        if config.embedding.max_item_tokens > config.embedding.max_tokens_per_batch {
            bail!("embedding.max_item_tokens must not exceed embedding.max_tokens_per_batch");
        }
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    // Validate managed corpus
    if config.managed.enabled
        && (config.managed.endpoint.is_none() || config.managed.corpus.is_none())
    {
        bail!("managed.endpoint and managed.corpus are required when managed.enabled = true");
    }

    if config.ingest.write_batch_limit == 0 {
        bail!("ingest.write_batch_limit must be > 0");
    }

    Ok(config)
}
