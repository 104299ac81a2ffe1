use crate::GraphError;

/// Cosine similarity between two equal-length vectors.
///
/// A zero-norm input (all zeros, or empty) yields exactly `0.0`. Vectors of
/// differing length are rejected with [`GraphError::DimensionMismatch`].
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Result<f64, GraphError> {
    if left.len() != right.len() {
        return Err(GraphError::DimensionMismatch {
            left: left.len(),
            right: right.len(),
        });
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (&l, &r) in left.iter().zip(right.iter()) {
        let (l, r) = (f64::from(l), f64::from(r));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

/// Stable descending sort by score; equal scores keep their input order.
pub(crate) fn sort_descending<T>(candidates: &mut [(T, f64)]) {
    candidates.sort_by(|left, right| right.1.total_cmp(&left.1));
}
