//! Change-aware ingestion pipeline.
//!
//! The [`Ingestor`] turns crawled documents into embedded, indexed fragment
//! sets. Per document it fingerprints the normalized content, compares it to
//! the stored version for that url, and skips, replaces, or inserts, which
//! is what makes re-crawling the whole site cheap and idempotent.
//!
//! Every fragment is chunked and embedded before anything touches the store,
//! so an embedding failure aborts the document with the prior version still
//! intact, and the store write itself is one transaction. Ingests of the
//! same url are serialized through a per-url async mutex; distinct urls run
//! in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;

use pagechat_core::chunk::{chunk_text, content_hash};
use pagechat_core::embedding::Embedder;
use pagechat_core::models::{DocumentInput, DocumentMeta, Fragment};
use pagechat_core::store::Store;

use crate::config::ChunkingConfig;

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    /// The stored content hash matches; nothing was written.
    Skipped,
    /// The url existed with different content; its fragment set was swapped.
    Replaced,
    /// The url was new.
    Inserted,
    /// Embedding or storage failed; the prior version (if any) is untouched.
    Failed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Skipped => "skipped",
            IngestOutcome::Replaced => "replaced",
            IngestOutcome::Inserted => "inserted",
            IngestOutcome::Failed => "failed",
        }
    }
}

/// Per-outcome counts for a batch run.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct IngestReport {
    pub inserted: u64,
    pub replaced: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl IngestReport {
    pub fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Replaced => self.replaced += 1,
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.replaced + self.skipped + self.failed
    }
}

/// One async mutex per url, created on demand.
///
/// Serializes the lookup/delete/insert window for concurrent ingests of the
/// same url; the outer map lock is held only long enough to clone the Arc.
#[derive(Default)]
struct UrlLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UrlLocks {
    async fn acquire(&self, url: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.entry(url.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The ingestion coordinator.
///
/// `embedder: None` is a text-only deployment: fragments are stored without
/// vectors and only lexical search applies. With an embedder present, one
/// embedding failure aborts the whole document.
pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    chunking: ChunkingConfig,
    locks: UrlLocks,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self { store, embedder, chunking, locks: UrlLocks::default() }
    }

    /// Ingest one document. Never propagates an error: failures come back
    /// as [`IngestOutcome::Failed`] so a batch continues with the next
    /// document.
    pub async fn ingest(&self, input: &DocumentInput) -> IngestOutcome {
        let _guard = self.locks.acquire(&input.url).await;

        match self.try_ingest(input).await {
            Ok(outcome) => {
                tracing::info!(url = %input.url, outcome = outcome.as_str(), "ingested document");
                outcome
            }
            Err(e) => {
                tracing::warn!(url = %input.url, error = %e,
                    "ingestion failed; prior version left intact");
                IngestOutcome::Failed
            }
        }
    }

    async fn try_ingest(&self, input: &DocumentInput) -> Result<IngestOutcome> {
        let hash = content_hash(&input.content);

        let existing = self.store.find_document(&input.url).await?;
        if let Some(meta) = &existing {
            if meta.content_hash == hash {
                return Ok(IngestOutcome::Skipped);
            }
        }

        let chunks = chunk_text(&input.content, self.chunking.chunk_size, self.chunking.overlap);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let embeddings = match &self.embedder {
            Some(embedder) if !texts.is_empty() => {
                let vectors = embedder.embed(&texts).await.context("embedding failed")?;
                anyhow::ensure!(
                    vectors.len() == chunks.len(),
                    "embedder returned {} vectors for {} fragments",
                    vectors.len(),
                    chunks.len()
                );
                vectors
            }
            _ => vec![Vec::new(); chunks.len()],
        };

        let fragments: Vec<Fragment> = chunks
            .into_iter()
            .map(|chunk| Fragment {
                id: format!("{}_{}", hash, chunk.index),
                doc_id: hash.clone(),
                chunk_index: chunk.index,
                doc_type: input.doc_type,
                url: input.url.clone(),
                title: input.title.clone(),
                content: chunk.content,
                scraped_at: input.scraped_at,
            })
            .collect();

        let meta = DocumentMeta {
            url: input.url.clone(),
            content_hash: hash,
            title: input.title.clone(),
            doc_type: input.doc_type,
            scraped_at: input.scraped_at,
        };

        self.store
            .replace_document(&meta, &fragments, &embeddings)
            .await
            .context("storage write failed")?;

        Ok(if existing.is_some() { IngestOutcome::Replaced } else { IngestOutcome::Inserted })
    }

    /// Ingest every document in the iterator, reporting per-outcome counts.
    pub async fn ingest_all<I>(&self, inputs: I) -> IngestReport
    where
        I: IntoIterator<Item = DocumentInput>,
    {
        let mut report = IngestReport::default();
        for input in inputs {
            report.record(self.ingest(&input).await);
        }
        report
    }
}

/// CLI entry point: ingest a JSON-lines crawl dump.
pub async fn run_ingest(config: &crate::config::Config, path: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dump file: {}", path.display()))?;

    let mut inputs = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let input: DocumentInput = serde_json::from_str(line)
            .with_context(|| format!("Invalid document on line {}", line_no + 1))?;
        inputs.push(input);
    }

    let pool = crate::db::connect(config).await?;
    let store = Arc::new(crate::sqlite_store::SqliteStore::new(pool.clone()));
    let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_enabled() {
        Some(Arc::from(crate::embedding::create_embedder(&config.embedding)?))
    } else {
        None
    };
    let ingestor = Ingestor::new(store, embedder, config.chunking.clone());

    let report = ingestor.ingest_all(inputs).await;

    println!("ingest {}", path.display());
    println!("  documents: {}", report.total());
    println!("  inserted: {}", report.inserted);
    println!("  replaced: {}", report.replaced);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
