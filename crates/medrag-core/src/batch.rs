//! Token-aware batch planning for embedding calls.
//!
//! Embedding providers limit both the number of inputs per request and the
//! total tokens per request. [`plan_batches`] greedily packs items into
//! contiguous sub-batches bounded by both, so concatenating the per-batch
//! outputs reproduces the input order exactly.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::embedding::estimate_tokens;
use crate::error::{RagError, RagResult};

/// Limits applied when packing texts into provider requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum inputs per request.
    pub max_items: usize,
    /// Maximum cumulative estimated tokens per request.
    pub max_batch_tokens: usize,
    /// Maximum estimated tokens for any single input.
    pub max_item_tokens: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: 100,
            max_batch_tokens: 20_000,
            max_item_tokens: 8_000,
        }
    }
}

/// Reject the whole call if any text exceeds the per-item limit.
///
/// Every offending index is reported, not just the first.
pub fn validate_item_tokens(texts: &[String], max_item_tokens: usize) -> RagResult<()> {
    let indices: Vec<usize> = texts
        .iter()
        .enumerate()
        .filter(|(_, t)| estimate_tokens(t) > max_item_tokens)
        .map(|(i, _)| i)
        .collect();

    if indices.is_empty() {
        Ok(())
    } else {
        Err(RagError::OversizedChunks {
            indices,
            limit: max_item_tokens,
        })
    }
}

/// Pack texts into contiguous index ranges.
///
/// A batch is flushed as soon as adding the next item would exceed either
/// `max_items` or `max_batch_tokens`. An item is never split, and a batch is
/// never empty.
pub fn plan_batches(texts: &[String], limits: &BatchLimits) -> Vec<Range<usize>> {
    let max_items = limits.max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut tokens = 0usize;

    for (i, text) in texts.iter().enumerate() {
        let t = estimate_tokens(text);
        let count = i - start;
        if count > 0 && (count + 1 > max_items || tokens + t > limits.max_batch_tokens) {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += t;
    }

    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}
