use std::cmp::Ordering;

use common::error::AppError;

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Sums are accumulated in `f64` and the result is clamped to `[-1, 1]`.
/// When either vector has zero norm (or contains non-finite values) the
/// similarity is defined as `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    if a.len() != b.len() {
        return Err(AppError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 || !denominator.is_finite() || !dot.is_finite() {
        return Ok(0.0);
    }

    #[allow(clippy::cast_possible_truncation)]
    Ok((dot / denominator).clamp(-1.0, 1.0) as f32)
}

/// Orders by score, highest first. Equal scores compare equal so a stable
/// sort keeps their existing (insertion) order.
pub fn by_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
