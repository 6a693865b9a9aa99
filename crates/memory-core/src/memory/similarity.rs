//! Cosine similarity over sparse term-frequency vectors.

use super::types::TermVector;

/// Cosine similarity in [0, 1]; 0 when either vector is empty
pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    // Keys missing from either side contribute nothing to the dot product
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(token, &count)| large.get(token).map(|&other| count as f64 * other as f64))
        .sum();

    let norm_a = squared_norm(a);
    let norm_b = squared_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b).sqrt()).clamp(0.0, 1.0)
}

fn squared_norm(v: &TermVector) -> f64 {
    v.values().map(|&c| (c as f64) * (c as f64)).sum()
}
