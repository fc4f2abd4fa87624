//! # pagechat
//!
//! **A retrieval-and-ingestion engine for answering questions about an
//! organization's public web content.**
//!
//! pagechat takes the documents an external crawler produces, turns them
//! into embedded, indexed fragments, and answers multi-turn questions over
//! them by fusing lexical and vector retrieval and routing every chat turn
//! through a per-conversation state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │ Crawler  │──▶│  Ingestion   │──▶│   SQLite   │
//! │ (extern) │   │ Chunk+Embed  │   │ FTS5 + Vec │
//! └──────────┘   └──────────────┘   └─────┬──────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!               ┌──────────┐       ┌────────────┐
//!               │  Search  │◀──────│   Router   │──▶ generation service
//!               │ (hybrid) │       │ (per conv) │
//!               └──────────┘       └────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The crawler posts normalized documents (`POST /ingest` or a JSONL
//!    dump via `pagechat ingest`).
//! 2. The **ingestion pipeline** ([`ingest`]) fingerprints each document,
//!    skips unchanged urls, and atomically replaces changed ones with a
//!    freshly chunked and embedded fragment set.
//! 3. The **search engine** (`pagechat-core`) ranks fragments lexically
//!    (FTS5) and by vector similarity, fused with reciprocal rank fusion.
//! 4. The **router** ([`router`]) classifies each chat turn, decides
//!    whether to retrieve, clarify, or answer directly, and builds the
//!    prompt for the generation service.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | Embedding providers: OpenAI-compatible, Ollama |
//! | [`generation`] | Generation provider: OpenAI-compatible completions |
//! | [`classify`] | Structured query classification and clarification judging |
//! | [`prompts`] | The router's prompt-template bundle |
//! | [`ingest`] | Change-aware ingestion: hash → skip/replace/insert |
//! | [`router`] | Per-conversation routing state machine |
//! | [`search`] | App-level search entry points and CLI formatting |
//! | [`server`] | JSON HTTP API (Axum) with CORS |

pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod prompts;
pub mod router;
pub mod search;
pub mod server;
pub mod sqlite_store;

#[cfg(test)]
pub(crate) mod testing;

pub use pagechat_core::models::{DocumentInput, Fragment};
pub use router::{ChatRequest, ChatResponse, ChatRouter};
