//! Application-level search entry points.
//!
//! The core algorithm (candidate rankings, fusion, resolution) lives in
//! `pagechat-core::search` and operates through the [`Store`] trait. This
//! wrapper handles config, the database connection, query embedding, and
//! CLI output formatting; the HTTP server delegates to the same function.

use anyhow::{bail, Result};
use std::sync::Arc;

use pagechat_core::embedding::{embed_query, Embedder};
use pagechat_core::models::{Filter, FilterColumn, FilterOp, Fragment, RetrievalMode};
use pagechat_core::search::{SearchParams, SearchRequest};
use pagechat_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Run a search against an already-open store.
pub async fn search_fragments(
    store: &dyn Store,
    embedder: &dyn Embedder,
    config: &Config,
    query: &str,
    mode: RetrievalMode,
    top: Option<usize>,
    doc_type: Option<&str>,
) -> Result<Vec<Fragment>> {
    let query_text = matches!(mode, RetrievalMode::Text | RetrievalMode::Hybrid)
        .then(|| query.to_string());
    let query_vector = match mode {
        RetrievalMode::Vector | RetrievalMode::Hybrid => Some(embed_query(embedder, query).await?),
        RetrievalMode::Text => None,
    };

    let filters = match doc_type {
        Some(t) => vec![Filter {
            column: FilterColumn::DocType,
            op: FilterOp::Eq,
            value: t.to_string(),
        }],
        None => Vec::new(),
    };

    let request = SearchRequest {
        query_text,
        query_vector,
        top: top.unwrap_or(config.retrieval.top),
        filters,
        params: SearchParams {
            breadth: config.retrieval.breadth,
            rrf_k: config.retrieval.rrf_k,
        },
    };

    Ok(pagechat_core::search::search(store, &request).await?)
}

/// CLI entry point — opens the store, searches, prints results.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    top: Option<usize>,
    doc_type: Option<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mode: RetrievalMode = mode.parse()?;
    if matches!(mode, RetrievalMode::Vector | RetrievalMode::Hybrid)
        && !config.embedding.is_enabled()
    {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            match mode {
                RetrievalMode::Vector => "vector",
                _ => "hybrid",
            }
        );
    }

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let embedder = create_embedder(&config.embedding)?;

    let results = search_fragments(
        store.as_ref(),
        embedder.as_ref(),
        config,
        query,
        mode,
        top,
        doc_type.as_deref(),
    )
    .await?;

    if results.is_empty() {
        println!("No results.");
    } else {
        for (i, fragment) in results.iter().enumerate() {
            println!("{}. {} [{}]", i + 1, fragment.title, fragment.doc_type.as_str());
            println!("    url: {}", fragment.url);
            println!("    scraped: {}", fragment.scraped_at.format("%Y-%m-%dT%H:%M:%SZ"));
            let excerpt: String = fragment.content.chars().take(240).collect();
            println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
            println!("    id: {}", fragment.id);
            println!();
        }
    }

    pool.close().await;
    Ok(())
}
