//! # pagechat core
//!
//! Shared logic for pagechat: data models, the fragment chunker, reciprocal
//! rank fusion, the store abstraction, the hybrid search algorithm, the
//! embedding/generation provider traits, and per-conversation session state.
//!
//! This crate contains no tokio, sqlx, network, or filesystem dependencies.
//! Everything here is exercised by the `pagechat` application crate, which
//! supplies the SQLite store and the HTTP provider implementations.

pub mod chunk;
pub mod embedding;
pub mod fusion;
pub mod generation;
pub mod models;
pub mod search;
pub mod session;
pub mod store;
