//! Pure similarity and aggregation math.
//!
//! Inputs are trusted to be unit-length (the embedding provider normalizes
//! on generation), so `cosine_similarity` never re-normalizes. Callers
//! clamp the weighted aggregate, not this primitive.

use crate::error::{EngineError, EngineResult};
use crate::types::{Category, CategoryScores};
use crate::weights::MatchWeights;

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero norm, and
/// `EngineError::DimensionMismatch` when the lengths differ. The result is
/// in [-1, 1]; aggregation clamps, this function does not.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> EngineResult<f32> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot_product / (norm_a * norm_b))
    }
}

/// Weighted sum of the per-category scores, clamped to [0, 1].
///
/// Pure helper usable outside the ranking path, e.g. to recompute a score
/// for an explanation request that already has category scores.
#[must_use]
pub fn weighted_score(scores: &CategoryScores, weights: &MatchWeights) -> f32 {
    let total: f64 = Category::ALL
        .iter()
        .map(|c| weights.get(*c) * f64::from(scores.get(*c)))
        .sum();
    total.clamp(0.0, 1.0) as f32
}
