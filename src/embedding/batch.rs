//! Batched, rate-limited, retrying embedding runner.
//!
//! [`BatchEmbedder`] wraps a single-attempt [`Embedder`] and is the only way
//! the ingestion pipeline and the orchestrator produce vectors:
//!
//! 1. Reject the whole call if any item exceeds the per-item token limit.
//! 2. Pack items into sub-batches bounded by item count and token budget.
//! 3. Send sub-batches in order, pausing `batch_delay` between calls.
//! 4. Retry each sub-batch with capped exponential backoff. Exhaustion
//!    aborts the remaining sub-batches.
//! 5. Check that exactly one vector of the model's dimension came back per
//!    input, in input order.

use std::sync::Arc;
use std::time::Duration;

use medrag_core::batch::{plan_batches, validate_item_tokens, BatchLimits};
use medrag_core::embedding::Embedder;
use medrag_core::retry::RetryPolicy;
use medrag_core::{RagError, RagResult};

use crate::config::EmbeddingConfig;
use crate::retry::with_retry;

const SERVICE: &str = "embedding";

pub struct BatchEmbedder {
    inner: Arc<dyn Embedder>,
    limits: BatchLimits,
    policy: RetryPolicy,
    batch_delay: Duration,
    timeout: Duration,
}

impl BatchEmbedder {
    pub fn new(
        inner: Arc<dyn Embedder>,
        limits: BatchLimits,
        policy: RetryPolicy,
        batch_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            limits,
            policy,
            batch_delay,
            timeout,
        }
    }

    pub fn from_config(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self::new(
            inner,
            config.limits(),
            config.retry_policy(),
            config.batch_delay(),
            config.timeout(),
        )
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub fn dims(&self) -> usize {
        self.inner.dims()
    }

    /// Embed every text, returning one vector per input in input order.
    pub async fn embed_all(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        validate_item_tokens(texts, self.limits.max_item_tokens)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches = plan_batches(texts, &self.limits);
        let total = batches.len();
        let mut vectors = Vec::with_capacity(texts.len());

        for (n, range) in batches.into_iter().enumerate() {
            if n > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let slice = &texts[range.clone()];
            let inner = &self.inner;
            let batch = with_retry(SERVICE, &self.policy, self.timeout, move || {
                inner.embed(slice)
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    batch = n + 1,
                    batches = total,
                    items = slice.len(),
                    error = %e,
                    "embedding sub-batch failed; aborting remaining batches"
                );
                e
            })?;

            self.check_batch(slice.len(), &batch)?;
            tracing::debug!(batch = n + 1, batches = total, items = slice.len(), "sub-batch embedded");
            vectors.extend(batch);
        }

        Ok(vectors)
    }

    /// Embed a single query string through the same path.
    pub async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        self.embed_all(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external(SERVICE, "empty embedding response"))
    }

    fn check_batch(&self, expected: usize, batch: &[Vec<f32>]) -> RagResult<()> {
        if batch.len() != expected {
            return Err(RagError::external(
                SERVICE,
                format!("expected {} embeddings, got {}", expected, batch.len()),
            ));
        }
        let dims = self.inner.dims();
        if let Some(bad) = batch.iter().find(|v| v.len() != dims) {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every call; fails the first `fail_first` calls with `error`.
    struct ScriptedEmbedder {
        dims: usize,
        calls: Mutex<Vec<(tokio::time::Instant, usize)>>,
        fail_first: usize,
        error: RagError,
    }

    impl ScriptedEmbedder {
        fn new(fail_first: usize, error: RagError) -> Self {
            Self {
                dims: 3,
                calls: Mutex::new(Vec::new()),
                fail_first,
                error,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((tokio::time::Instant::now(), texts.len()));
                calls.len()
            };
            if n <= self.fail_first {
                return Err(self.error.clone());
            }
            // Encode the text length so order can be checked.
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 0.0, 1.0])
                .collect())
        }
    }

    fn runner(inner: Arc<dyn Embedder>, max_items: usize) -> BatchEmbedder {
        BatchEmbedder::new(
            inner,
            BatchLimits {
                max_items,
                max_batch_tokens: 1_000,
                max_item_tokens: 100,
            },
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_millis(400),
            },
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    fn texts(n: usize) -> Vec<String> {
        (1..=n).map(|i| "a".repeat(i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_matches_input_order() {
        let inner = Arc::new(ScriptedEmbedder::new(0, RagError::transient(SERVICE, "")));
        let embedder = runner(inner.clone(), 2);
        let vectors = embedder.embed_all(&texts(5)).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], (i + 1) as f32);
        }
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_sub_batches() {
        let inner = Arc::new(ScriptedEmbedder::new(0, RagError::transient(SERVICE, "")));
        let embedder = runner(inner.clone(), 1);
        embedder.embed_all(&texts(3)).await.unwrap();

        let calls = inner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let inner = Arc::new(ScriptedEmbedder::new(
            2,
            RagError::transient(SERVICE, "HTTP 429: slow down"),
        ));
        let embedder = runner(inner.clone(), 10);
        let vectors = embedder.embed_all(&texts(4)).await.unwrap();
        assert_eq!(vectors.len(), 4);
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_aborts_remaining_batches() {
        let inner = Arc::new(ScriptedEmbedder::new(
            usize::MAX,
            RagError::transient(SERVICE, "HTTP 503"),
        ));
        let embedder = runner(inner.clone(), 1);
        let err = embedder.embed_all(&texts(4)).await.unwrap_err();
        assert!(err.is_retryable());
        // Three attempts on the first sub-batch, none on the rest.
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_item_fails_before_any_call() {
        let inner = Arc::new(ScriptedEmbedder::new(0, RagError::transient(SERVICE, "")));
        let embedder = runner(inner.clone(), 10);
        let mut input = texts(3);
        input.push("x".repeat(1_000));

        match embedder.embed_all(&input).await {
            Err(RagError::OversizedChunks { indices, limit }) => {
                assert_eq!(indices, vec![3]);
                assert_eq!(limit, 100);
            }
            other => panic!("expected OversizedChunks, got {:?}", other),
        }
        assert_eq!(inner.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_dimension_is_rejected() {
        let mut scripted = ScriptedEmbedder::new(0, RagError::transient(SERVICE, ""));
        scripted.dims = 8;
        let embedder = runner(Arc::new(scripted), 10);
        let err = embedder.embed_all(&texts(2)).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_query_single_item() {
        let inner = Arc::new(ScriptedEmbedder::new(0, RagError::transient(SERVICE, "")));
        let embedder = runner(inner, 10);
        let v = embedder.embed_query("malaria").await.unwrap();
        assert_eq!(v, vec![7.0, 0.0, 1.0]);
    }
}
