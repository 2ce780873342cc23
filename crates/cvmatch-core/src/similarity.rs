const EPSILON: f32 = 1e-8;

/// Cosine similarity that never fails.
///
/// Returns `0.0` for empty input, mismatched lengths or a zero-magnitude side, so one
/// malformed vector only sinks its own candidate.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() { return 0.0; }
    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 { return 0.0; }
    let score = dot / (na.sqrt() * nb.sqrt() + EPSILON);
    if score.is_finite() { score } else { 0.0 }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() { *x /= norm; }
    }
}
