//! In-memory [`Store`] implementation for tests.
//!
//! `HashMap` and `Vec` behind `std::sync::RwLock`. Vector ranking is
//! brute-force cosine similarity; lexical ranking counts matching query
//! terms. Both honor filters through [`Filter::matches`].

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{DocumentMeta, Filter, Fragment};

use super::Store;

struct StoredFragment {
    fragment: Fragment,
    embedding: Vec<f32>,
}

/// In-memory store. Replacement semantics match the SQLite store: a write
/// for a url drops every fragment previously held for that url.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, DocumentMeta>>,
    fragments: RwLock<Vec<StoredFragment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fragments currently stored, across all documents.
    pub fn fragment_count(&self) -> usize {
        self.fragments.read().unwrap().len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_document(&self, url: &str) -> Result<Option<DocumentMeta>> {
        Ok(self.docs.read().unwrap().get(url).cloned())
    }

    async fn replace_document(
        &self,
        doc: &DocumentMeta,
        fragments: &[Fragment],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        anyhow::ensure!(
            fragments.len() == embeddings.len(),
            "fragment and embedding counts differ"
        );
        let mut docs = self.docs.write().unwrap();
        let mut stored = self.fragments.write().unwrap();
        stored.retain(|s| s.fragment.url != doc.url);
        for (fragment, embedding) in fragments.iter().zip(embeddings.iter()) {
            stored.push(StoredFragment {
                fragment: fragment.clone(),
                embedding: embedding.clone(),
            });
        }
        docs.insert(doc.url.clone(), doc.clone());
        Ok(())
    }

    async fn vector_ranking(
        &self,
        query: &[f32],
        breadth: usize,
        filters: &[Filter],
    ) -> Result<Vec<String>> {
        let stored = self.fragments.read().unwrap();
        let mut scored: Vec<(String, f32)> = stored
            .iter()
            .filter(|s| filters.iter().all(|f| f.matches(&s.fragment)))
            .map(|s| (s.fragment.id.clone(), cosine_similarity(query, &s.embedding)))
            .collect();
        // Ascending distance is descending similarity.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(breadth);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn lexical_ranking(
        &self,
        query: &str,
        breadth: usize,
        filters: &[Filter],
    ) -> Result<Vec<String>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.fragments.read().unwrap();
        let mut scored: Vec<(String, usize)> = stored
            .iter()
            .filter(|s| filters.iter().all(|f| f.matches(&s.fragment)))
            .filter_map(|s| {
                let text = s.fragment.content.to_lowercase();
                let hits = terms.iter().filter(|t| text.contains(*t)).count();
                (hits > 0).then(|| (s.fragment.id.clone(), hits))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(breadth);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn get_fragments(&self, ids: &[String]) -> Result<Vec<Fragment>> {
        let stored = self.fragments.read().unwrap();
        let by_id: HashMap<&str, &Fragment> = stored
            .iter()
            .map(|s| (s.fragment.id.as_str(), &s.fragment))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|f| (*f).clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, FilterColumn, FilterOp};
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

    #[tokio::test]
    async fn replace_drops_all_prior_fragments_for_the_url() {
        let store = InMemoryStore::new();
        store
            .replace_document(
                &doc("u", "h1"),
                &[fragment("u", "h1", 0, "old"), fragment("u", "h1", 1, "old too")],
                &[vec![1.0], vec![1.0]],
            )
            .await
            .unwrap();
        store
            .replace_document(&doc("u", "h2"), &[fragment("u", "h2", 0, "new")], &[vec![1.0]])
            .await
            .unwrap();

        assert_eq!(store.fragment_count(), 1);
        let found = store.find_document("u").await.unwrap().unwrap();
        assert_eq!(found.content_hash, "h2");
    }

    #[tokio::test]
    async fn lexical_ranking_honors_filters() {
        let store = InMemoryStore::new();
        let mut pdf = fragment("u2", "h2", 0, "fees info");
        pdf.doc_type = DocType::Pdf;
        store
            .replace_document(&doc("u1", "h1"), &[fragment("u1", "h1", 0, "fees info")], &[vec![1.0]])
            .await
            .unwrap();
        store
            .replace_document(&doc("u2", "h2"), &[pdf], &[vec![1.0]])
            .await
            .unwrap();

        let only_pdf = vec![Filter {
            column: FilterColumn::DocType,
            op: FilterOp::Eq,
            value: "pdf".to_string(),
        }];
        let ids = store.lexical_ranking("fees", 10, &only_pdf).await.unwrap();
        assert_eq!(ids, vec!["h2_0".to_string()]);
    }

    #[tokio::test]
    async fn get_fragments_preserves_requested_order() {
        let store = InMemoryStore::new();
        store
            .replace_document(
                &doc("u", "h"),
                &[fragment("u", "h", 0, "a"), fragment("u", "h", 1, "b")],
                &[vec![1.0], vec![0.5]],
            )
            .await
            .unwrap();

        let ids = vec!["h_1".to_string(), "h_0".to_string(), "missing".to_string()];
        let fragments = store.get_fragments(&ids).await.unwrap();
        let got: Vec<&str> = fragments.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(got, vec!["h_1", "h_0"]);
    }
}
