//! Reciprocal rank fusion.
//!
//! Merges the vector and lexical rankings into one: every fragment id that
//! appears in either list scores `1/(k + rank)` per list it appears in, with
//! outer-join semantics (absence from a list contributes 0 for that term).
//!
//! Ranks are 1-based plain ordinals in list order. The store already orders
//! each candidate list (ascending distance, descending lexical relevance),
//! so the fragment at position `i` has rank `i + 1`. Ties in the underlying
//! scores keep their list order; determinism of the fused output comes from
//! the fragment-id tie-break below, not from the rank assignment.

use std::collections::HashMap;

/// The standard fusion constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fuse two ordered candidate lists into `(fragment_id, score)` pairs,
/// sorted by score descending, ties broken by fragment id ascending.
pub fn reciprocal_rank_fusion(
    vector_ids: &[String],
    lexical_ids: &[String],
    k: f64,
) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for (position, id) in vector_ids.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (k + (position + 1) as f64);
    }
    for (position, id) in lexical_ids.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (k + (position + 1) as f64);
    }

    let mut fused: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}
