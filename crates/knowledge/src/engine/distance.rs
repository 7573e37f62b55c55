//! Result ranking shared by both index topologies, plus vector normalization.

use crate::types::{VectorHandle, NO_MATCH};
use std::cmp::Ordering;

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
///
/// On unit vectors squared L2 equals `2 - 2·cos`, so nearest-by-L2 and
/// nearest-by-cosine rank identically.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Order `(handle, distance)` pairs nearest first, handle ascending on ties.
pub(crate) fn rank(results: &mut [(VectorHandle, f32)]) {
    results.sort_by(|(id_a, d_a), (id_b, d_b)| {
        d_a.partial_cmp(d_b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| id_a.cmp(id_b))
    });
}

/// Truncate to `top_k` and pad with `(NO_MATCH, +inf)` up to `top_k`.
pub(crate) fn finish(mut results: Vec<(VectorHandle, f32)>, top_k: usize) -> Vec<(VectorHandle, f32)> {
    rank(&mut results);
    results.truncate(top_k);
    results.resize(top_k, (NO_MATCH, f32::INFINITY));
    results
}
