//! Embedding provider trait and vector helpers.
//!
//! The embedding service is an external collaborator; the core only knows
//! the [`Embedder`] trait. Concrete HTTP-backed providers live in the
//! `pagechat` application crate, and tests substitute deterministic mocks.

use anyhow::Result;
use async_trait::async_trait;

/// A service that turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The model identifier, for diagnostics.
    fn model_name(&self) -> &str;

    /// The vector dimensionality every call returns.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let mut vectors = embedder.embed(&texts).await?;
    vectors
        .pop()
        .ok_or_else(|| anyhow::anyhow!("embedding service returned no vector"))
}

/// Encode a vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`] back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty or mismatched-length vectors; the caller treats
/// that as "no signal" rather than an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
