//! HTTP API server.
//!
//! Exposes ingestion, search, and chat over a small JSON API. The crawler
//! feeds `POST /ingest`; a frontend drives `POST /chat`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest` | Ingest one crawled document |
//! | `POST` | `/search` | Search indexed fragments |
//! | `POST` | `/chat` | One conversational turn |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `embeddings_disabled` (400),
//! `generation_disabled` (400), `internal` (500).
//!
//! All origins are permitted (browser frontends talk to this directly).

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use pagechat_core::embedding::Embedder;
use pagechat_core::models::{DocumentInput, RetrievalMode};
use pagechat_core::search::SearchParams;
use pagechat_core::session::{SessionStore, UserProfile};
use pagechat_core::store::Store;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::Ingestor;
use crate::prompts::PromptBundle;
use crate::router::{ChatOverrides, ChatRouter, RouterSettings};
use crate::sqlite_store::SqliteStore;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    ingestor: Arc<Ingestor>,
    router: Arc<ChatRouter>,
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, code: "bad_request", message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let pool = crate::db::connect(&config).await?;
    crate::migrate::apply_schema(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let generator: Arc<dyn pagechat_core::generation::Generator> =
        Arc::from(create_generator(&config.generation)?);

    let ingest_embedder = config.embedding.is_enabled().then(|| embedder.clone());
    let ingestor = Arc::new(Ingestor::new(
        store.clone() as Arc<dyn Store>,
        ingest_embedder,
        config.chunking.clone(),
    ));

    let router = Arc::new(ChatRouter::new(
        store.clone() as Arc<dyn Store>,
        embedder.clone(),
        generator,
        PromptBundle::default(),
        Arc::new(SessionStore::new()),
        RouterSettings {
            default_mode: config.retrieval.mode.parse()?,
            default_top: config.retrieval.top,
            search_params: SearchParams {
                breadth: config.retrieval.breadth,
                rrf_k: config.retrieval.rrf_k,
            },
            with_user_profile: config.chat.with_user_profile,
            history_limit: config.chat.history_limit,
        },
    ));

    let state = AppState { config, store, embedder, ingestor, router };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/search", post(search))
        .route("/chat", post(chat))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ingest(
    State(state): State<AppState>,
    Json(input): Json<DocumentInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if input.url.trim().is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }

    let outcome = state.ingestor.ingest(&input).await;
    Ok(Json(serde_json::json!({
        "result": { "url": input.url, "outcome": outcome.as_str() }
    })))
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    top: Option<usize>,
    #[serde(default)]
    doc_type: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let mode: RetrievalMode = body
        .mode
        .as_deref()
        .unwrap_or(&state.config.retrieval.mode)
        .parse()
        .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;

    if matches!(mode, RetrievalMode::Vector | RetrievalMode::Hybrid)
        && !state.config.embedding.is_enabled()
    {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled",
            message: "vector and hybrid modes require an embedding provider".to_string(),
        });
    }

    let results = crate::search::search_fragments(
        state.store.as_ref(),
        state.embedder.as_ref(),
        &state.config,
        &body.query,
        mode,
        body.top,
        body.doc_type.as_deref(),
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "result": { "results": results } })))
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    conversation_id: Option<String>,
    messages: Vec<pagechat_core::models::ChatMessage>,
    #[serde(default)]
    overrides: ChatOverrides,
    #[serde(default)]
    user_profile: Option<UserProfile>,
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.config.generation.is_enabled() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "generation_disabled",
            message: "chat requires a generation provider".to_string(),
        });
    }
    if body.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let conversation_id = body
        .conversation_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request = crate::router::ChatRequest {
        conversation_id: conversation_id.clone(),
        messages: body.messages,
        overrides: body.overrides,
        user_profile: body.user_profile,
    };

    let response = state.router.chat(&request).await;
    Ok(Json(serde_json::json!({
        "result": {
            "conversation_id": conversation_id,
            "answer": response.answer,
            "trace": response.trace,
        }
    })))
}
