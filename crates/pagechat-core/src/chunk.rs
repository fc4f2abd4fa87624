//! Sliding-window text chunker.
//!
//! Splits normalized document text into overlapping fixed-size pieces that
//! are embedded and indexed independently. Windows are measured in
//! characters and advance by `chunk_size - overlap`, so consecutive pieces
//! share exactly `overlap` characters and every character of the input lands
//! in at least one piece. Window edges are always valid UTF-8 boundaries
//! because slicing happens on `char_indices` offsets.
//!
//! Guarantees:
//!
//! - Empty input yields zero chunks.
//! - Input shorter than `chunk_size` yields exactly one chunk equal to the
//!   input.
//! - Chunk indices are contiguous starting at 0.
//! - Concatenating chunk 0 with every later chunk minus its first `overlap`
//!   characters reconstructs the input.

use sha2::{Digest, Sha256};

/// Default window size, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default window overlap, in characters.
pub const DEFAULT_OVERLAP: usize = 128;

/// One piece of a chunked document, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: i64,
    pub content: String,
}

/// Compute the content fingerprint of a document's normalized text.
///
/// This is the `doc_id`: a lowercase hex SHA-256 over the full text. Two
/// crawls of the same url with identical normalized content always produce
/// the same fingerprint, which is what makes ingestion idempotent.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// # Panics
///
/// Panics if `overlap >= chunk_size` or `chunk_size == 0`; the application
/// config validates both before any chunking happens.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    assert!(chunk_size > 0, "chunk_size must be > 0");
    assert!(overlap < chunk_size, "overlap must be < chunk_size");

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the string, so
    // windows counted in characters slice on valid boundaries.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;

    if n_chars <= chunk_size {
        return vec![Chunk { index: 0, content: text.to_string() }];
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(n_chars);
        chunks.push(Chunk {
            index: chunks.len() as i64,
            content: text[bounds[start]..bounds[end]].to_string(),
        });
        if end == n_chars {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 512, 128).is_empty());
    }

    #[test]
    fn short_input_yields_single_identical_chunk() {
        let chunks = chunk_text("Fees are due in October.", 512, 128);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Fees are due in October.");
    }

    #[test]
    fn input_exactly_chunk_size_stays_single() {
        let text = "a".repeat(64);
        let chunks = chunk_text(&text, 64, 16);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 64, 16);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64);
        }
    }

    #[test]
    fn consecutive_chunks_share_exactly_overlap() {
        let text: String = ('a'..='z').cycle().take(500).collect();
        let (size, overlap) = (100, 25);
        let chunks = chunk_text(&text, size, overlap);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].content.chars().skip(size - overlap).collect();
            let head: String = pair[1].content.chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn dropping_overlap_reconstructs_input() {
        let text: String = "The quick brown fox jumps over the lazy dog. "
            .repeat(40);
        let (size, overlap) = (128, 32);
        let chunks = chunk_text(&text, size, overlap);
        assert!(chunks.len() > 2);

        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.content.chars().skip(overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn multibyte_input_slices_on_char_boundaries() {
        let text = "département ünïcode — ".repeat(60);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() > 1);

        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.content.chars().skip(20));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Determinism matters for doc ids. ".repeat(30);
        assert_eq!(chunk_text(&text, 64, 16), chunk_text(&text, 64, 16));
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        let h1 = content_hash("Fees are due in October.");
        let h2 = content_hash("Fees are due in October.");
        let h3 = content_hash("Fees are due in November.");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
    }
}
