//! Hybrid search over a [`Store`].
//!
//! The engine issues the vector and/or lexical candidate queries, fuses the
//! two rankings with reciprocal rank fusion when both are present, truncates
//! to the requested size, and resolves the surviving ids to full fragments.
//! It operates entirely through the [`Store`] trait; embedding the query
//! text is the caller's job.

use thiserror::Error;

use crate::fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
use crate::models::{Filter, Fragment};
use crate::store::Store;

/// Internal candidate-list cap applied to each ranking before fusion.
pub const DEFAULT_BREADTH: usize = 20;

/// Retrieval tuning knobs, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Candidates fetched per ranking before fusion.
    pub breadth: usize,
    /// The `k` in `1/(k + rank)`.
    pub rrf_k: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams { breadth: DEFAULT_BREADTH, rrf_k: DEFAULT_RRF_K }
    }
}

/// All inputs for one search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    pub query_vector: Option<Vec<f32>>,
    /// Maximum fragments returned.
    pub top: usize,
    /// Conjunctive ingestion-time predicates.
    pub filters: Vec<Filter>,
    pub params: SearchParams,
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// Neither query text nor a query vector was supplied.
    #[error("invalid query: supply query text, a query vector, or both")]
    InvalidQuery,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Run a search and return fragments in final rank order.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest,
) -> Result<Vec<Fragment>, SearchError> {
    let query_text = req
        .query_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let query_vector = req.query_vector.as_deref().filter(|v| !v.is_empty());

    if query_text.is_none() && query_vector.is_none() {
        return Err(SearchError::InvalidQuery);
    }

    let vector_ids = match query_vector {
        Some(vector) => store.vector_ranking(vector, req.params.breadth, &req.filters).await?,
        None => Vec::new(),
    };
    let lexical_ids = match query_text {
        Some(text) => store.lexical_ranking(text, req.params.breadth, &req.filters).await?,
        None => Vec::new(),
    };

    // With a single ranking there is nothing to fuse; return it as-is.
    let mut ordered: Vec<String> = match (query_vector.is_some(), query_text.is_some()) {
        (true, false) => vector_ids,
        (false, true) => lexical_ids,
        _ => reciprocal_rank_fusion(&vector_ids, &lexical_ids, req.params.rrf_k)
            .into_iter()
            .map(|(id, _)| id)
            .collect(),
    };
    ordered.truncate(req.top);

    Ok(store.get_fragments(&ordered).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, DocumentMeta};
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    fn doc(url: &str, hash: &str) -> DocumentMeta {
        DocumentMeta {
            url: url.to_string(),
            content_hash: hash.to_string(),
            title: "t".to_string(),
            doc_type: DocType::Webpage,
            scraped_at: Utc::now(),
        }
    }

    fn fragment(url: &str, doc_id: &str, index: i64, content: &str) -> Fragment {
        Fragment {
            id: format!("{}_{}", doc_id, index),
            doc_id: doc_id.to_string(),
            chunk_index: index,
            doc_type: DocType::Webpage,
            url: url.to_string(),
            title: "t".to_string(),
            content: content.to_string(),
            scraped_at: Utc::now(),
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .replace_document(
                &doc("u1", "h1"),
                &[fragment("u1", "h1", 0, "fees are due in october")],
                &[vec![1.0, 0.0]],
            )
            .await
            .unwrap();
        store
            .replace_document(
                &doc("u2", "h2"),
                &[fragment("u2", "h2", 0, "library opening hours")],
                &[vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn rejects_empty_queries_with_a_typed_error() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query_text: None,
            query_vector: None,
            top: 3,
            filters: vec![],
            params: SearchParams::default(),
        };
        assert!(matches!(search(&store, &req).await, Err(SearchError::InvalidQuery)));

        // Whitespace-only text with no vector is just as empty.
        let req = SearchRequest { query_text: Some("   ".to_string()), ..req };
        assert!(matches!(search(&store, &req).await, Err(SearchError::InvalidQuery)));
    }

    #[tokio::test]
    async fn text_only_returns_the_lexical_ranking() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query_text: Some("fees".to_string()),
            query_vector: None,
            top: 3,
            filters: vec![],
            params: SearchParams::default(),
        };
        let results = search(&store, &req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("fees"));
    }

    #[tokio::test]
    async fn vector_only_returns_the_vector_ranking() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query_text: None,
            query_vector: Some(vec![0.0, 1.0]),
            top: 1,
            filters: vec![],
            params: SearchParams::default(),
        };
        let results = search(&store, &req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "h2_0");
    }

    #[tokio::test]
    async fn hybrid_prefers_fragments_present_in_both_rankings() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query_text: Some("fees".to_string()),
            query_vector: Some(vec![1.0, 0.0]),
            top: 2,
            filters: vec![],
            params: SearchParams::default(),
        };
        let results = search(&store, &req).await.unwrap();
        assert_eq!(results[0].id, "h1_0");
    }

    #[tokio::test]
    async fn top_truncates_the_fused_ranking() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query_text: None,
            query_vector: Some(vec![1.0, 1.0]),
            top: 1,
            filters: vec![],
            params: SearchParams::default(),
        };
        let results = search(&store, &req).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
