//! Deadlines and retry loops for external calls.
//!
//! Every call to an embedding model, the managed corpus, or the answer
//! generator goes through [`with_timeout`]; calls that may be retried go
//! through [`with_retry`], which applies a [`RetryPolicy`] on top.
//!
//! Retry strategy:
//! - `TransientExternal` (HTTP 429, 5xx, network errors, timeouts) → retry
//! - anything else → fail immediately
//! - backoff: `initial × 2^(attempt-1)`, capped at `max_backoff`

use std::future::Future;
use std::time::Duration;

use medrag_core::retry::RetryPolicy;
use medrag_core::{RagError, RagResult};

/// Run `fut`, converting an elapsed deadline into a retryable error.
pub async fn with_timeout<T, Fut>(service: &str, limit: Duration, fut: Fut) -> RagResult<T>
where
    Fut: Future<Output = RagResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::timeout(service, limit)),
    }
}

/// Call `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Each attempt is bounded by `limit`. The last error is returned on
/// exhaustion.
pub async fn with_retry<T, F, Fut>(
    service: &str,
    policy: &RetryPolicy,
    limit: Duration,
    mut op: F,
) -> RagResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RagResult<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1u32;

    loop {
        match with_timeout(service, limit, op()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    service,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(service, attempts, error = %err, "retries exhausted");
                }
                return Err(err);
            }
        }
    }
}
