//! HTTP query server.
//!
//! Exposes the orchestrator and the router over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | `{ "message", "role"? }` → retrieval result |
//! | `POST` | `/route` | `{ "message", "role"? }` → routing decision only |
//! | `GET`  | `/corpus` | Local corpus report and managed corpus status |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "validation failed: query is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). Strategy failures are
//! not errors: `/query` always answers with a result, falling back to a safe
//! answer when no source is reachable.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser chat clients
//! can call the API directly.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use medrag_core::models::{QueryAnalysis, RetrievalResult, Role};
use medrag_core::RagError;

use crate::config::Config;
use crate::managed::{CorpusStatus, ManagedRetrieval};
use crate::orchestrator::HybridOrchestrator;
use crate::services::Services;
use crate::sqlite_store::SqliteStore;
use crate::status::{corpus_report, CorpusReport};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<HybridOrchestrator>,
    store: Arc<SqliteStore>,
    managed: Arc<dyn ManagedRetrieval>,
}

impl AppState {
    pub fn new(services: &Services) -> Self {
        Self {
            orchestrator: services.orchestrator.clone(),
            store: services.store.clone(),
            managed: services.managed.clone(),
        }
    }
}

/// Build the router with every endpoint and the CORS layer.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/route", post(handle_route))
        .route("/corpus", get(handle_corpus))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = app(AppState::new(&services));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("medrag server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Validation(_) | RagError::OversizedChunks { .. } => {
                bad_request(err.to_string())
            }
            other => internal(other.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /query, POST /route ============

#[derive(Deserialize)]
struct QueryRequest {
    message: String,
    #[serde(default)]
    role: Role,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RetrievalResult>, AppError> {
    let result = state.orchestrator.try_query(&req.message, req.role).await?;
    tracing::info!(
        strategy = %result.strategy_used,
        confidence = result.confidence,
        fallback = result.fallback_used,
        elapsed_ms = result.processing_time_ms,
        "query answered"
    );
    Ok(Json(result))
}

async fn handle_route(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Json<QueryAnalysis> {
    Json(state.orchestrator.route(&req.message, req.role))
}

// ============ GET /corpus ============

#[derive(Serialize)]
struct CorpusResponse {
    local: CorpusReport,
    managed: Option<CorpusStatus>,
}

async fn handle_corpus(State(state): State<AppState>) -> Result<Json<CorpusResponse>, AppError> {
    let local = corpus_report(&state.store, 10)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    let managed = match state.managed.check_status().await {
        Ok(status) => Some(status),
        Err(err) => {
            tracing::warn!(error = %err, "managed corpus status unavailable");
            None
        }
    };
    Ok(Json(CorpusResponse { local, managed }))
}
