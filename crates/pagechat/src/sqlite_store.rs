//! SQLite-backed [`Store`] implementation.
//!
//! Fragments live in a plain table (with the embedding BLOB inline), the
//! lexical index in an FTS5 virtual table, and the two stay in step because
//! every write goes through the transactional `replace_document`.
//!
//! Filters compile to `AND column op ?` clauses: column names and operators
//! come from the core enums, never from input, and values are always bound
//! as parameters.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use pagechat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use pagechat_core::models::{DocType, DocumentMeta, Filter, Fragment};
use pagechat_core::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Compile filters into `AND ...` SQL with a parallel bind list.
fn filter_clauses(filters: &[Filter]) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut binds = Vec::with_capacity(filters.len());
    for filter in filters {
        sql.push_str(&format!(
            " AND f.{} {} ?",
            filter.column.as_sql(),
            filter.op.as_sql()
        ));
        binds.push(filter.value.clone());
    }
    (sql, binds)
}

/// Quote each whitespace-separated term so FTS5 treats the query as plain
/// tokens; raw punctuation like `?` or `-` is operator syntax to FTS5 and
/// would otherwise fail the whole query.
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> Result<Fragment> {
    let doc_type: String = row.get("doc_type");
    Ok(Fragment {
        id: row.get("id"),
        doc_id: row.get("doc_id"),
        chunk_index: row.get("chunk_index"),
        doc_type: doc_type.parse::<DocType>()?,
        url: row.get("url"),
        title: row.get("title"),
        content: row.get("content"),
        scraped_at: ts_to_datetime(row.get("scraped_at")),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_document(&self, url: &str) -> Result<Option<DocumentMeta>> {
        let row = sqlx::query(
            "SELECT url, content_hash, title, doc_type, scraped_at FROM documents WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let doc_type: String = r.get("doc_type");
            Ok(DocumentMeta {
                url: r.get("url"),
                content_hash: r.get("content_hash"),
                title: r.get("title"),
                doc_type: doc_type.parse::<DocType>()?,
                scraped_at: ts_to_datetime(r.get("scraped_at")),
            })
        })
        .transpose()
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

        let mut tx = self.pool.begin().await?;

        // Drop every prior fragment for this url, whatever doc_id it
        // belonged to, keeping the FTS index in step.
        sqlx::query("DELETE FROM fragments_fts WHERE url = ?")
            .bind(&doc.url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fragments WHERE url = ?")
            .bind(&doc.url)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (url, content_hash, title, doc_type, scraped_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                content_hash = excluded.content_hash,
                title = excluded.title,
                doc_type = excluded.doc_type,
                scraped_at = excluded.scraped_at
            "#,
        )
        .bind(&doc.url)
        .bind(&doc.content_hash)
        .bind(&doc.title)
        .bind(doc.doc_type.as_str())
        .bind(doc.scraped_at.timestamp())
        .execute(&mut *tx)
        .await?;

        for (fragment, embedding) in fragments.iter().zip(embeddings.iter()) {
            sqlx::query(
                r#"
                INSERT INTO fragments
                    (id, doc_id, chunk_index, doc_type, url, title, content, scraped_at, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&fragment.id)
            .bind(&fragment.doc_id)
            .bind(fragment.chunk_index)
            .bind(fragment.doc_type.as_str())
            .bind(&fragment.url)
            .bind(&fragment.title)
            .bind(&fragment.content)
            .bind(fragment.scraped_at.timestamp())
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO fragments_fts (fragment_id, url, content) VALUES (?, ?, ?)")
                .bind(&fragment.id)
                .bind(&fragment.url)
                .bind(&fragment.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn vector_ranking(
        &self,
        query: &[f32],
        breadth: usize,
        filters: &[Filter],
    ) -> Result<Vec<String>> {
        let (filter_sql, binds) = filter_clauses(filters);
        let sql = format!(
            "SELECT f.id, f.embedding FROM fragments f WHERE 1=1{}",
            filter_sql
        );

        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = q.bind(value);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut scored: Vec<(String, f32)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query, &blob_to_vec(&blob));
                (row.get("id"), similarity)
            })
            .collect();

        // Ascending cosine distance is descending similarity; the id
        // tie-break keeps the ranking deterministic.
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
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let (filter_sql, binds) = filter_clauses(filters);
        let sql = format!(
            r#"
            SELECT f.id
            FROM fragments_fts
            JOIN fragments f ON f.id = fragments_fts.fragment_id
            WHERE fragments_fts MATCH ?{}
            ORDER BY fragments_fts.rank, f.id
            LIMIT ?
            "#,
            filter_sql
        );

        let mut q = sqlx::query(&sql).bind(&match_expr);
        for value in &binds {
            q = q.bind(value);
        }
        let rows = q.bind(breadth as i64).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn get_fragments(&self, ids: &[String]) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                r#"
                SELECT id, doc_id, chunk_index, doc_type, url, title, content, scraped_at
                FROM fragments WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                fragments.push(row_to_fragment(&row)?);
            }
        }
        Ok(fragments)
    }
}
