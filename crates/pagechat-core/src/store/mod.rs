//! Storage abstraction.
//!
//! The [`Store`] trait is the only data dependency of the search engine, and
//! the only write surface of the ingestion coordinator. The application
//! provides a SQLite implementation (FTS5 for the lexical index, blob
//! vectors for similarity); [`memory::InMemoryStore`] backs the test suite.
//!
//! Implementations must be `Send + Sync` so stores can be shared across
//! request handlers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocumentMeta, Filter, Fragment};

/// Abstract storage backend for documents and fragments.
///
/// `replace_document` is the single write path and must be transactional:
/// after it returns, either the new fragment set is fully visible or the
/// prior one is untouched, never a mix. The two ranking methods return
/// fragment ids only, already ordered best-first, so rank fusion never
/// drags full rows through the merge.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up the current document row for a url.
    async fn find_document(&self, url: &str) -> Result<Option<DocumentMeta>>;

    /// Atomically delete every fragment stored for `doc.url` (any doc_id)
    /// and insert the new set. `embeddings` is parallel to `fragments`.
    async fn replace_document(
        &self,
        doc: &DocumentMeta,
        fragments: &[Fragment],
        embeddings: &[Vec<f32>],
    ) -> Result<()>;

    /// Fragment ids ordered ascending by vector distance to `query`,
    /// capped at `breadth`.
    async fn vector_ranking(
        &self,
        query: &[f32],
        breadth: usize,
        filters: &[Filter],
    ) -> Result<Vec<String>>;

    /// Fragment ids ordered descending by lexical relevance to `query`,
    /// capped at `breadth`.
    async fn lexical_ranking(
        &self,
        query: &str,
        breadth: usize,
        filters: &[Filter],
    ) -> Result<Vec<String>>;

    /// Resolve fragment ids to full records, preserving the input order.
    /// Ids that no longer exist are silently dropped.
    async fn get_fragments(&self, ids: &[String]) -> Result<Vec<Fragment>>;
}
