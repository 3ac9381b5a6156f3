//! Session-facing HTTP API.
//!
//! Exposes the document-analysis pipeline as a JSON API for browser
//! clients. All state lives in the injected [`SessionStore`]; handlers
//! never touch globals.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Upload a PDF (raw bytes); starts background processing |
//! | `GET`  | `/api/status/{id}` | Processing state of a session |
//! | `POST` | `/api/chat` | Ask a question against a ready session |
//! | `GET`  | `/api/history/{id}` | Conversation history of a session |
//! | `DELETE` | `/api/session/{id}` | End a session and clean up its storage |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses are JSON:
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "session ... is not ready" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready`
//! (409), `internal` (500). An unknown session id and a session that is
//! still processing are deliberately distinct responses.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::{looks_like_pdf, DocumentParser, PdfTextParser};
use crate::ingest;
use crate::llm::{create_chat_model, create_vision_model, ChatModel, VisionModel};
use crate::models::{SourceRef, Turn};
use crate::rag;
use crate::session::{SessionError, SessionStore};
use crate::store::KnowledgeStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    sessions: SessionStore,
    parser: Arc<dyn DocumentParser>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    vision: Arc<dyn VisionModel>,
}

/// Starts the HTTP server with providers built from configuration.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.generation)?;
    let vision = create_vision_model(&config.vision)?;
    run_server_with_models(config, Arc::new(PdfTextParser), embedder, chat, vision).await
}

/// Starts the HTTP server with explicit parser and model handles.
///
/// The standard entry point is [`run_server`]; this variant exists so
/// alternative parser backends (or test doubles) can be wired in.
pub async fn run_server_with_models(
    config: &Config,
    parser: Arc<dyn DocumentParser>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    vision: Arc<dyn VisionModel>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let state = AppState {
        config: Arc::new(config.clone()),
        sessions: SessionStore::new(),
        parser,
        embedder,
        chat,
        vision,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/status/{id}", get(handle_status))
        .route("/api/chat", post(handle_chat))
        .route("/api/history/{id}", get(handle_history))
        .route("/api/session/{id}", delete(handle_delete))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("finsight API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn not_ready(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "not_ready".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => not_found(e.to_string()),
            SessionError::NotReady { .. } => not_ready(e.to_string()),
        }
    }
}

// ============ POST /api/upload ============

#[derive(Deserialize)]
struct UploadParams {
    /// Original filename, for status display.
    name: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    message: String,
}

/// Accepts a PDF as the raw request body, creates a session, and starts
/// background processing. The caller polls `/api/status/{id}`.
async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    if body.is_empty() {
        return Err(bad_request("empty upload"));
    }
    if !looks_like_pdf(&body) {
        return Err(bad_request("only PDF files are supported"));
    }

    let (session_id, dir, cancelled) = state
        .sessions
        .create(&state.config.storage.data_dir, params.name.clone())
        .await
        .map_err(|e| internal(format!("could not create session directory: {}", e)))?;

    let pdf_path = dir.join("document.pdf");
    if let Err(e) = std::fs::write(&pdf_path, &body) {
        let _ = state.sessions.delete(&session_id).await;
        return Err(internal(format!("could not store upload: {}", e)));
    }

    tokio::spawn(process_document(
        state.clone(),
        session_id.clone(),
        pdf_path,
        dir,
        cancelled,
    ));

    Ok(Json(UploadResponse {
        session_id,
        message: "Upload successful. Processing started.".to_string(),
    }))
}

/// Background ingestion task for one uploaded document.
async fn process_document(
    state: AppState,
    session_id: String,
    pdf_path: PathBuf,
    dir: PathBuf,
    cancelled: Arc<AtomicBool>,
) {
    state
        .sessions
        .set_message(&session_id, "Extracting text, tables, and charts...")
        .await;

    let result = ingest::ingest_document(
        state.parser.as_ref(),
        state.embedder.as_ref(),
        state.vision.as_ref(),
        &state.config,
        &pdf_path,
        &dir,
        &cancelled,
    )
    .await;

    if cancelled.load(Ordering::Relaxed) {
        // Session was deleted mid-flight; nothing left to report to.
        return;
    }

    match result {
        Ok(report) => {
            let message = format!(
                "Ready — {} text chunks, {} tables, {} charts indexed",
                report.text_units, report.table_units, report.image_units
            );
            state
                .sessions
                .mark_ready(&session_id, ingest::store_path(&dir), &message)
                .await;
        }
        Err(e) => {
            state.sessions.mark_error(&session_id, &e.to_string()).await;
        }
    }
}

// ============ GET /api/status/{id} ============

#[derive(Serialize)]
struct StatusResponse {
    session_id: String,
    state: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_name: Option<String>,
}

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.sessions.status(&id).await?;
    Ok(Json(StatusResponse {
        session_id: id,
        state: status.state.as_str().to_string(),
        message: status.message,
        document_name: status.document_name,
    }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<SourceRef>,
}

/// Answers one question against a ready session. Failures leave the
/// session `ready`; only this request fails.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let (store_path, history) = state.sessions.ready_store(&request.session_id).await?;

    let store = KnowledgeStore::open(&store_path, state.embedder.as_ref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    let result = rag::answer(
        &store,
        state.embedder.as_ref(),
        state.chat.as_ref(),
        &state.config.retrieval,
        &history,
        &request.message,
    )
    .await;
    store.close().await;

    let answer = result.map_err(|e| internal(format!("{:#}", e)))?;

    state
        .sessions
        .append_exchange(&request.session_id, &request.message, &answer.text)
        .await?;

    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

// ============ GET /api/history/{id} ============

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<Turn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let history = state.sessions.history(&id).await?;
    Ok(Json(HistoryResponse { history }))
}

// ============ DELETE /api/session/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.sessions.delete(&id).await?;
    Ok(Json(DeleteResponse {
        message: "Session deleted".to_string(),
    }))
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
