//! Hybrid query orchestration.
//!
//! A query moves through a small state machine:
//!
//! ```text
//! ROUTE ─▶ EXECUTE(primary) ─▶ SUCCESS
//!                 │
//!                 ▼
//!             FALLBACK ─▶ EXECUTE(alternate) ─▶ SUCCESS
//!                                 │
//!                                 ▼
//!                             safe answer
//! ```
//!
//! | Primary | Alternate | Confidence factor |
//! |---------|-----------|-------------------|
//! | managed | custom    | 0.7 |
//! | custom  | managed   | 0.7 |
//! | hybrid  | custom    | 0.6 |
//!
//! The hybrid strategy runs both branches concurrently and succeeds when
//! either does. [`HybridOrchestrator::hybrid_query`] never fails: every
//! outcome, including a rejected query, is a well-formed
//! [`RetrievalResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use medrag_core::models::{
    snippet, Origin, QueryAnalysis, RetrievalResult, Role, ScoredChunk, Source, Strategy,
};
use medrag_core::retry::RetryPolicy;
use medrag_core::router::classify;
use medrag_core::store::{SearchFilter, VectorStore};
use medrag_core::{RagError, RagResult};

use crate::config::{Config, GenerationConfig, ManagedConfig, RetrievalConfig};
use crate::embedding::batch::BatchEmbedder;
use crate::generate::{answer_prompt, synthesis_prompt, AnswerGenerator, Prompt};
use crate::managed::ManagedRetrieval;
use crate::retry::with_retry;

/// Returned when every strategy failed.
pub const SAFE_ANSWER: &str = "I'm sorry, I can't answer that right now because the medical \
information sources are unavailable. Please try again later, or contact a health worker or \
your nearest clinic for advice.";

/// Returned for queries rejected before retrieval.
pub const INVALID_QUERY_ANSWER: &str =
    "Please ask a health question with a few more details so I can look it up.";

pub const FALLBACK_FACTOR: f64 = 0.7;
pub const HYBRID_FALLBACK_FACTOR: f64 = 0.6;
/// Applied when only one hybrid branch succeeds.
pub const SINGLE_BRANCH_FACTOR: f64 = 0.8;

/// Alternate strategy and confidence factor used after `strategy` fails.
pub fn fallback_for(strategy: Strategy) -> (Strategy, f64) {
    match strategy {
        Strategy::Managed => (Strategy::Custom, FALLBACK_FACTOR),
        Strategy::Custom => (Strategy::Managed, FALLBACK_FACTOR),
        Strategy::Hybrid => (Strategy::Custom, HYBRID_FALLBACK_FACTOR),
    }
}

/// Trim `message` and reject it when shorter than `min_chars`.
pub fn validate_query(message: &str, min_chars: usize) -> RagResult<&str> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(RagError::Validation("query is empty".into()));
    }
    if trimmed.chars().count() < min_chars {
        return Err(RagError::Validation(format!(
            "query must be at least {} characters",
            min_chars
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub top_k: usize,
    pub managed_top_k: usize,
    pub filter: Option<SearchFilter>,
    pub min_query_chars: usize,
    /// Bound on each attempt of an external call made while answering.
    pub call_timeout: Duration,
    pub managed_retry: RetryPolicy,
    pub generation_retry: RetryPolicy,
}

impl QuerySettings {
    pub fn from_config(config: &Config) -> Self {
        Self::from_parts(&config.retrieval, &config.managed, &config.generation)
    }

    pub fn from_parts(
        retrieval: &RetrievalConfig,
        managed: &ManagedConfig,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            top_k: retrieval.top_k,
            managed_top_k: retrieval.managed_top_k,
            filter: retrieval.category.clone().map(SearchFilter::category),
            min_query_chars: retrieval.min_query_chars,
            call_timeout: Duration::from_secs(retrieval.query_timeout_secs),
            managed_retry: managed.retry_policy(),
            generation_retry: generation.retry_policy(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from_parts(
            &RetrievalConfig::default(),
            &ManagedConfig::default(),
            &GenerationConfig::default(),
        )
    }
}

/// Answer, citations, and confidence from one strategy execution.
#[derive(Debug, Clone)]
struct StepOutcome {
    answer: String,
    sources: Vec<Source>,
    confidence: f64,
}

pub struct HybridOrchestrator {
    store: Arc<dyn VectorStore>,
    embedder: Arc<BatchEmbedder>,
    managed: Arc<dyn ManagedRetrieval>,
    generator: Arc<dyn AnswerGenerator>,
    settings: QuerySettings,
}

impl HybridOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<BatchEmbedder>,
        managed: Arc<dyn ManagedRetrieval>,
        generator: Arc<dyn AnswerGenerator>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            store,
            embedder,
            managed,
            generator,
            settings,
        }
    }

    pub fn route(&self, message: &str, role: Role) -> QueryAnalysis {
        classify(message, role)
    }

    /// Answer a query; never fails.
    ///
    /// A rejected query yields [`INVALID_QUERY_ANSWER`] with confidence 0.
    pub async fn hybrid_query(&self, message: &str, role: Role) -> RetrievalResult {
        let started = Instant::now();
        match self.try_query(message, role).await {
            Ok(result) => result,
            Err(err) => {
                tracing::info!(error = %err, "query rejected");
                RetrievalResult {
                    answer: INVALID_QUERY_ANSWER.to_string(),
                    sources: Vec::new(),
                    strategy_used: classify(message, role).strategy,
                    confidence: 0.0,
                    processing_time_ms: elapsed_ms(started),
                    fallback_used: false,
                }
            }
        }
    }

    /// Like [`hybrid_query`](Self::hybrid_query), but surfaces validation
    /// errors instead of converting them. Strategy failures still resolve
    /// to a result.
    pub async fn try_query(&self, message: &str, role: Role) -> RagResult<RetrievalResult> {
        let started = Instant::now();
        let question = validate_query(message, self.settings.min_query_chars)?;

        let analysis = classify(question, role);
        tracing::info!(
            strategy = %analysis.strategy,
            confidence = analysis.confidence,
            role = %role,
            reasoning = %analysis.reasoning,
            "query routed"
        );

        let primary = analysis.strategy;
        let primary_err = match self.execute(primary, question, role).await {
            Ok(step) => return Ok(finish(step, primary, started, false)),
            Err(err) => err,
        };

        let (alternate, factor) = fallback_for(primary);
        tracing::warn!(
            strategy = %primary,
            fallback = %alternate,
            error = %primary_err,
            "strategy failed, falling back"
        );

        match self.execute(alternate, question, role).await {
            Ok(mut step) => {
                step.confidence *= factor;
                Ok(finish(step, alternate, started, true))
            }
            Err(fallback_err) => {
                let exhausted = RagError::HybridExhaustion {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                };
                tracing::error!(strategy = %primary, error = %exhausted, "returning safe answer");
                Ok(RetrievalResult {
                    answer: SAFE_ANSWER.to_string(),
                    sources: Vec::new(),
                    strategy_used: primary,
                    confidence: 0.0,
                    processing_time_ms: elapsed_ms(started),
                    fallback_used: true,
                })
            }
        }
    }

    async fn execute(&self, strategy: Strategy, question: &str, role: Role) -> RagResult<StepOutcome> {
        match strategy {
            Strategy::Managed => self.run_managed(question).await,
            Strategy::Custom => self.run_custom(question, role).await,
            Strategy::Hybrid => self.run_hybrid(question, role).await,
        }
    }

    async fn run_managed(&self, question: &str) -> RagResult<StepOutcome> {
        let managed = &self.managed;
        let top_k = self.settings.managed_top_k;
        let answer = with_retry(
            "managed retrieval",
            &self.settings.managed_retry,
            self.settings.call_timeout,
            move || managed.query(question, top_k),
        )
        .await?;
        Ok(StepOutcome {
            answer: answer.answer,
            sources: answer.sources,
            confidence: answer.confidence.clamp(0.0, 1.0),
        })
    }

    async fn run_custom(&self, question: &str, role: Role) -> RagResult<StepOutcome> {
        let vector = self.embedder.embed_query(question).await?;
        let hits = self
            .store
            .search(&vector, self.settings.top_k, self.settings.filter.as_ref())
            .await?;
        if hits.is_empty() {
            return Err(RagError::CorpusUnavailable(
                "no indexed chunks to ground an answer".into(),
            ));
        }

        let prompt = answer_prompt(question, role, &hits);
        let answer = self.generate(&prompt).await?;

        Ok(StepOutcome {
            answer,
            confidence: mean_similarity(&hits),
            sources: hits.iter().map(custom_source).collect(),
        })
    }

    async fn run_hybrid(&self, question: &str, role: Role) -> RagResult<StepOutcome> {
        let (managed, custom) = tokio::join!(self.run_managed(question), self.run_custom(question, role));

        match (managed, custom) {
            (Ok(managed), Ok(custom)) => {
                let answer = self.synthesize(question, role, &managed, &custom).await;
                let confidence = (managed.confidence + custom.confidence) / 2.0;
                let mut sources = managed.sources;
                sources.extend(custom.sources);
                Ok(StepOutcome {
                    answer,
                    sources,
                    confidence,
                })
            }
            (Ok(mut only), Err(err)) | (Err(err), Ok(mut only)) => {
                tracing::warn!(error = %err, "hybrid branch failed, using the other");
                only.confidence *= SINGLE_BRANCH_FACTOR;
                Ok(only)
            }
            (Err(managed_err), Err(custom_err)) => Err(RagError::external(
                "hybrid",
                format!("managed: {}; custom: {}", managed_err, custom_err),
            )),
        }
    }

    async fn generate(&self, prompt: &Prompt) -> RagResult<String> {
        let generator = &self.generator;
        with_retry(
            "generation",
            &self.settings.generation_retry,
            self.settings.call_timeout,
            move || generator.generate(prompt),
        )
        .await
    }

    /// Merge both branch answers; on failure keep the more confident one.
    async fn synthesize(
        &self,
        question: &str,
        role: Role,
        managed: &StepOutcome,
        custom: &StepOutcome,
    ) -> String {
        let prompt = synthesis_prompt(question, role, &managed.answer, &custom.answer);
        match self.generate(&prompt).await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(error = %err, "synthesis failed, keeping the stronger branch answer");
                if managed.confidence >= custom.confidence {
                    managed.answer.clone()
                } else {
                    custom.answer.clone()
                }
            }
        }
    }
}

fn finish(step: StepOutcome, strategy: Strategy, started: Instant, fallback_used: bool) -> RetrievalResult {
    RetrievalResult {
        answer: step.answer,
        sources: step.sources,
        strategy_used: strategy,
        confidence: step.confidence.clamp(0.0, 1.0),
        processing_time_ms: elapsed_ms(started),
        fallback_used,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Mean similarity of the hits, clamped to `[0, 1]`.
pub fn mean_similarity(hits: &[ScoredChunk]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let sum: f64 = hits.iter().map(|h| h.similarity as f64).sum();
    (sum / hits.len() as f64).clamp(0.0, 1.0)
}

fn custom_source(hit: &ScoredChunk) -> Source {
    Source {
        title: hit.chunk.title.clone(),
        snippet: snippet(&hit.chunk.content),
        origin: Origin::Custom,
        confidence: Some(hit.similarity as f64),
        uri: hit.chunk.page_number.map(|p| format!("{}#page={}", hit.chunk.document_id, p)),
    }
}
