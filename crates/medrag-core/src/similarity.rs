//! Exact cosine-similarity ranking.
//!
//! Both store implementations score candidates through [`rank_top_k`], so
//! ordering and tie-breaking are identical regardless of backend.

use std::cmp::Ordering;

use crate::models::{Chunk, ScoredChunk};

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` (never NaN) for empty vectors, vectors of different
/// lengths, or when either vector has zero norm.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // f64 accumulation keeps tiny and huge components from underflowing or
    // overflowing the norms.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    (sim as f32).clamp(-1.0, 1.0)
}

/// Score every candidate against `query` and keep the best `k`.
///
/// Sorted by similarity descending; ties are broken by chunk id so results
/// are stable across backends.
pub fn rank_top_k<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (&'a Chunk, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|(chunk, embedding)| ScoredChunk {
            chunk: chunk.clone(),
            similarity: cosine_similarity(query, embedding),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(k);
    scored
}
