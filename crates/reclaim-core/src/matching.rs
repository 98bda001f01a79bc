//! Identity matching
//!
//! Similarity metrics over face embeddings (fixed-length numeric vectors).
//! Mismatched dimensions or empty vectors are hard errors, never a soft
//! non-match: a malformed comparison must not be mistaken for "different
//! person".

use crate::error::AppError;

/// Metric used to compare two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// Higher is more similar; range [-1, 1].
    Cosine,
    /// Lower is more similar.
    L2,
}

fn validate_embeddings(a: &[f32], b: &[f32]) -> Result<(), AppError> {
    if a.is_empty() || b.is_empty() {
        return Err(AppError::EmbeddingMismatch("Empty embeddings".into()));
    }
    if a.len() != b.len() {
        return Err(AppError::EmbeddingMismatch(format!(
            "Embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

/// Cosine similarity between two embeddings. A zero denominator (either
/// vector all zeros) yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    validate_embeddings(a, b)?;

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denom) as f32)
}

/// Euclidean (L2) distance between two embeddings.
pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    validate_embeddings(a, b)?;

    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt() as f32)
}

/// Decide whether two embeddings represent the same person.
///
/// For `Cosine` the match requires `score >= threshold`; for `L2` it requires
/// `score <= 1 - threshold` (tuned for normalized histogram embeddings).
/// Returns `(matched, score)`.
pub fn is_match(
    a: &[f32],
    b: &[f32],
    method: MatchMethod,
    threshold: f32,
) -> Result<(bool, f32), AppError> {
    match method {
        MatchMethod::Cosine => {
            let score = cosine_similarity(a, b)?;
            Ok((score >= threshold, score))
        }
        MatchMethod::L2 => {
            let score = l2_distance(a, b)?;
            Ok((score <= 1.0 - threshold, score))
        }
    }
}
