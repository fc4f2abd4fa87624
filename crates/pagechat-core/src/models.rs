//! Core data models shared by the ingestion pipeline, the search engine,
//! and the conversational router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of source a document was crawled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Webpage,
    Pdf,
    Doc,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Webpage => "webpage",
            DocType::Pdf => "pdf",
            DocType::Doc => "doc",
            DocType::Other => "other",
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webpage" => Ok(DocType::Webpage),
            "pdf" => Ok(DocType::Pdf),
            "doc" => Ok(DocType::Doc),
            "other" => Ok(DocType::Other),
            other => anyhow::bail!("unknown document type: {}", other),
        }
    }
}

/// A normalized crawled document handed to the ingestion coordinator.
///
/// The crawler and the HTML/PDF normalizer are external; by the time a
/// document reaches pagechat its `content` is plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub url: String,
    pub content: String,
    pub title: String,
    pub doc_type: DocType,
    pub scraped_at: DateTime<Utc>,
}

/// The stored identity of a document: one row per url, carrying the
/// fingerprint of the currently indexed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub url: String,
    pub content_hash: String,
    pub title: String,
    pub doc_type: DocType,
    pub scraped_at: DateTime<Utc>,
}

/// An indexed, embedded slice of a document.
///
/// `id` is `"{doc_id}_{chunk_index}"` where `doc_id` is the owning
/// document's content hash. A content change produces a fresh `doc_id` and
/// an entirely new fragment set; fragments are never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub doc_type: DocType,
    pub url: String,
    pub title: String,
    pub content: String,
    pub scraped_at: DateTime<Utc>,
}

impl Fragment {
    /// Render this fragment as a source block for a generation prompt.
    pub fn source_block(&self) -> String {
        format!("[{}] {} ({}): {}", self.id, self.title, self.url, self.content)
    }
}

/// Columns a search filter may target.
///
/// The allowlist is the injection guard: filter values are always bound as
/// query parameters, and column names never come from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterColumn {
    DocType,
    Url,
    Title,
    ScrapedAt,
}

impl FilterColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterColumn::DocType => "doc_type",
            FilterColumn::Url => "url",
            FilterColumn::Title => "title",
            FilterColumn::ScrapedAt => "scraped_at",
        }
    }
}

/// Comparison operators permitted in search filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like")]
    Like,
}

impl FilterOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Like => "LIKE",
        }
    }
}

/// A single ingestion-time predicate; a filter list is combined
/// conjunctively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub column: FilterColumn,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    /// Evaluate this predicate against a fragment.
    ///
    /// Used by the in-memory store; the SQLite store compiles filters to
    /// parameterized SQL instead.
    pub fn matches(&self, fragment: &Fragment) -> bool {
        let field = match self.column {
            FilterColumn::DocType => fragment.doc_type.as_str().to_string(),
            FilterColumn::Url => fragment.url.clone(),
            FilterColumn::Title => fragment.title.clone(),
            FilterColumn::ScrapedAt => fragment.scraped_at.timestamp().to_string(),
        };
        match self.op {
            FilterOp::Eq => field == self.value,
            FilterOp::Ne => field != self.value,
            FilterOp::Lt => field < self.value,
            FilterOp::Le => field <= self.value,
            FilterOp::Gt => field > self.value,
            FilterOp::Ge => field >= self.value,
            FilterOp::Like => field.contains(self.value.trim_matches('%')),
        }
    }
}

/// How a chat turn builds its retrieval query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Text,
    Vector,
    Hybrid,
}

impl std::str::FromStr for RetrievalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(RetrievalMode::Text),
            "vector" => Ok(RetrievalMode::Vector),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => anyhow::bail!("unknown retrieval mode: {}. Use text, vector, or hybrid.", other),
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}
