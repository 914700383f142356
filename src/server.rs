//! HTTP front end.
//!
//! Exposes one [`Session`] over a JSON API so a browser UI or another tool
//! can ask questions, trigger ingestion, and change the runtime knobs. The
//! session sits behind a [`tokio::sync::Mutex`] and requests are served one
//! at a time. `/ingest` is the exception: it holds the lock only to begin
//! and to publish, so `/ask` keeps answering from the live index while the
//! new generation is staged.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ask` | `{"question": "..."}` → answer, sources, provenance |
//! | `POST` | `/ingest` | `{"force": bool}` → ingest report |
//! | `POST` | `/reset/index` | Delete the index |
//! | `POST` | `/reset/conversation` | Clear conversation and tasks |
//! | `GET`  | `/settings` | Current tunables |
//! | `PUT`  | `/settings` | Partial update of tunables |
//! | `GET`  | `/history` | Conversation turns and summary |
//! | `GET`  | `/status` | Index manifest, tunables, tasks |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `ingest_error` (500), `internal` (500).

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::conversation::ConversationSummary;
use crate::ingest::IngestReport;
use crate::models::{ConversationTurn, Provenance};
use crate::progress::NoProgress;
use crate::session::{ingest_shared, Session, SessionStatus, Tunables};

pub type SharedSession = Arc<Mutex<Session>>;

/// Serve `session` on `bind` until the process is terminated.
pub async fn run_server(bind: &str, session: SharedSession) -> anyhow::Result<()> {
    let app = router(session);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
    println!("askdocs listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(session: SharedSession) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/ingest", post(handle_ingest))
        .route("/reset/index", post(handle_reset_index))
        .route("/reset/conversation", post(handle_reset_conversation))
        .route("/settings", get(handle_get_settings).put(handle_put_settings))
        .route("/history", get(handle_history))
        .route("/status", get(handle_status))
        .layer(cors)
        .with_state(session)
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(code: &str, err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: code.to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct SourceView {
    label: String,
    page: Option<u32>,
    display: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    provenance: Provenance,
    sources: Vec<SourceView>,
}

async fn handle_ask(
    State(session): State<SharedSession>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let outcome = session.lock().await.query(&request.question).await;
    Ok(Json(AskResponse {
        answer: outcome.answer,
        provenance: outcome.provenance,
        sources: outcome
            .sources
            .into_iter()
            .map(|s| SourceView {
                display: s.display(),
                label: s.label,
                page: s.page,
            })
            .collect(),
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestRequest {
    #[serde(default)]
    force: bool,
}

async fn handle_ingest(
    State(session): State<SharedSession>,
    body: Option<Json<IngestRequest>>,
) -> Result<Json<IngestReport>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let report = ingest_shared(&session, request.force, &NoProgress)
        .await
        .map_err(|e| internal("ingest_error", e))?;
    Ok(Json(report))
}

// ============ Resets ============

async fn handle_reset_index(
    State(session): State<SharedSession>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = session
        .lock()
        .await
        .reset_index()
        .await
        .map_err(|e| internal("internal", e))?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn handle_reset_conversation(State(session): State<SharedSession>) -> Json<serde_json::Value> {
    session.lock().await.reset();
    Json(serde_json::json!({ "status": "ok" }))
}

// ============ Settings ============

async fn handle_get_settings(State(session): State<SharedSession>) -> Json<Tunables> {
    Json(session.lock().await.tunables().clone())
}

#[derive(Deserialize)]
struct SettingsUpdate {
    k: Option<usize>,
    score_threshold: Option<f32>,
    temperature: Option<f32>,
    fallback_enabled: Option<bool>,
}

async fn handle_put_settings(
    State(session): State<SharedSession>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Tunables>, AppError> {
    let mut session = session.lock().await;
    let mut tunables = session.tunables().clone();
    if let Some(k) = update.k {
        tunables.k = k;
    }
    if let Some(t) = update.score_threshold {
        tunables.score_threshold = t;
    }
    if let Some(t) = update.temperature {
        tunables.temperature = t;
    }
    if let Some(f) = update.fallback_enabled {
        tunables.fallback_enabled = f;
    }
    session
        .apply_tunables(tunables)
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(session.tunables().clone()))
}

// ============ Introspection ============

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<ConversationTurn>,
    summary: ConversationSummary,
}

async fn handle_history(State(session): State<SharedSession>) -> Json<HistoryResponse> {
    let session = session.lock().await;
    Json(HistoryResponse {
        turns: session.history().to_vec(),
        summary: session.conversation_summary(),
    })
}

async fn handle_status(
    State(session): State<SharedSession>,
) -> Result<Json<SessionStatus>, AppError> {
    let status = session
        .lock()
        .await
        .status()
        .map_err(|e| internal("internal", e))?;
    Ok(Json(status))
}
