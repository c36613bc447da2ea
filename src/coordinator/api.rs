use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::checkpoints::{CheckpointStore, NewCheckpoint};
use super::hub::BroadcastHub;
use super::locks::LockManager;
use super::memory::{MemoryStore, NewMemory};
use super::models::{MemoryType, MessagePriority, Phase};
use super::process::ProcessRunner;
use super::sessions::{CollaborationTracker, NewMessage};
use super::ws::WsMessage;
use crate::errors::{CheckpointError, CollabError, ProcessError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub locks: LockManager,
    pub checkpoints: CheckpointStore,
    pub tracker: CollaborationTracker,
    pub memory: MemoryStore,
    pub hub: Arc<BroadcastHub>,
    pub runner: ProcessRunner,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LockRequest {
    pub file_id: i64,
    pub owner_id: i64,
}

#[derive(Serialize)]
pub struct AcquireResponse {
    pub granted: bool,
    pub reason: String,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub ok: bool,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct CreateCheckpointRequest {
    pub file_id: i64,
    pub project_id: i64,
    pub file_path: Option<String>,
    pub content: String,
    pub message: String,
    pub created_by: i64,
}

#[derive(Serialize)]
pub struct RestoreResponse {
    pub content: String,
}

#[derive(Deserialize)]
pub struct StartTerminalRequest {
    pub session_id: String,
    pub command: String,
    pub cwd: Option<String>,
}

#[derive(Deserialize)]
pub struct TerminalInputRequest {
    pub data: String,
}

#[derive(Deserialize)]
pub struct CreateCollabRequest {
    pub project_id: i64,
    pub participant_ids: Vec<i64>,
    pub objective: String,
}

#[derive(Deserialize)]
pub struct AdvancePhaseRequest {
    pub phase: Phase,
}

#[derive(Deserialize)]
pub struct RecordDecisionRequest {
    pub decision: String,
    pub made_by: i64,
    pub reasoning: String,
}

#[derive(Deserialize)]
pub struct EndCollabRequest {
    #[serde(default)]
    pub outcomes: Vec<String>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub from_agent_id: i64,
    pub to_agent_id: Option<i64>,
    pub message_type: String,
    pub content: String,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub response_required: bool,
}

#[derive(Deserialize)]
pub struct RecordMemoryRequest {
    pub agent_id: i64,
    pub project_id: Option<i64>,
    pub memory_type: MemoryType,
    pub summary: String,
    pub details: String,
    pub importance: u8,
}

#[derive(Deserialize)]
pub struct RecallQuery {
    pub project_id: Option<i64>,
    pub memory_type: Option<MemoryType>,
    pub limit: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<CheckpointError> for ApiError {
    fn from(err: CheckpointError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        ApiError::Conflict(err.to_string())
    }
}

impl From<CollabError> for ApiError {
    fn from(err: CollabError) -> Self {
        match err {
            CollabError::SessionNotFound { .. } => ApiError::NotFound(err.to_string()),
            CollabError::SessionNotActive { .. }
            | CollabError::InvalidPhaseTransition { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/locks", get(list_locks))
        .route("/api/locks/acquire", post(acquire_lock))
        .route("/api/locks/release", post(release_lock))
        .route("/api/locks/{file_id}", get(query_lock))
        .route("/api/checkpoints", post(create_checkpoint))
        .route("/api/checkpoints/{id}/restore", post(restore_checkpoint))
        .route("/api/files/{file_id}/checkpoints", get(list_checkpoints))
        .route("/api/terminal", get(list_terminals))
        .route("/api/terminal/start", post(start_terminal))
        .route("/api/terminal/{session_id}/input", post(terminal_input))
        .route("/api/terminal/{session_id}/kill", post(terminal_kill))
        .route("/api/collab", post(create_collab))
        .route("/api/collab/{session_id}", get(get_collab))
        .route("/api/collab/{session_id}/phase", post(advance_phase))
        .route("/api/collab/{session_id}/decisions", post(record_decision))
        .route("/api/collab/{session_id}/end", post(end_collab))
        .route(
            "/api/collab/{session_id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/memory", post(record_memory))
        .route("/api/memory/{agent_id}", get(recall_memory))
        .route("/api/live/sessions", get(list_live_sessions))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_locks(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.locks.all())
}

/// Acquire is rejected, never queued: a contended caller gets
/// `granted=false` plus who holds the lock, and decides itself whether to
/// retry or surface "locked by X" to the user.
async fn acquire_lock(
    State(state): State<SharedState>,
    Json(req): Json<LockRequest>,
) -> impl IntoResponse {
    match state.locks.acquire(req.file_id, req.owner_id) {
        Ok(lock) => {
            state.hub.broadcast(WsMessage::LockAcquired { lock });
            Json(AcquireResponse {
                granted: true,
                reason: format!("file {} locked by agent {}", req.file_id, req.owner_id),
            })
        }
        Err(err) => Json(AcquireResponse {
            granted: false,
            reason: err.to_string(),
        }),
    }
}

async fn release_lock(
    State(state): State<SharedState>,
    Json(req): Json<LockRequest>,
) -> impl IntoResponse {
    match state.locks.release(req.file_id, req.owner_id) {
        Ok(()) => {
            state.hub.broadcast(WsMessage::LockReleased {
                file_id: req.file_id,
                owner_id: req.owner_id,
            });
            Json(ReleaseResponse {
                ok: true,
                reason: format!("file {} released", req.file_id),
            })
        }
        Err(err) => Json(ReleaseResponse {
            ok: false,
            reason: err.to_string(),
        }),
    }
}

async fn query_lock(
    State(state): State<SharedState>,
    Path(file_id): Path<i64>,
) -> impl IntoResponse {
    Json(state.locks.query(file_id))
}

async fn create_checkpoint(
    State(state): State<SharedState>,
    Json(req): Json<CreateCheckpointRequest>,
) -> impl IntoResponse {
    let checkpoint = state.checkpoints.create(NewCheckpoint {
        file_id: req.file_id,
        project_id: req.project_id,
        file_path: req.file_path,
        content: req.content,
        message: req.message,
        created_by: req.created_by,
    });
    state.hub.broadcast(WsMessage::CheckpointCreated {
        checkpoint: checkpoint.clone(),
    });
    (StatusCode::CREATED, Json(checkpoint))
}

async fn list_checkpoints(
    State(state): State<SharedState>,
    Path(file_id): Path<i64>,
) -> impl IntoResponse {
    Json(state.checkpoints.list(file_id))
}

async fn restore_checkpoint(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let content = state.checkpoints.restore(id)?;
    Ok(Json(RestoreResponse { content }))
}

async fn list_terminals(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.runner.list().await)
}

async fn start_terminal(
    State(state): State<SharedState>,
    Json(req): Json<StartTerminalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .runner
        .start(&req.session_id, &req.command, req.cwd.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"ok": true}))))
}

async fn terminal_input(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<TerminalInputRequest>,
) -> impl IntoResponse {
    state.runner.send_input(&session_id, &req.data).await;
    Json(serde_json::json!({"ok": true}))
}

async fn terminal_kill(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    state.runner.kill(&session_id).await;
    Json(serde_json::json!({"ok": true}))
}

async fn create_collab(
    State(state): State<SharedState>,
    Json(req): Json<CreateCollabRequest>,
) -> impl IntoResponse {
    let session = state
        .tracker
        .start(req.project_id, req.participant_ids, &req.objective);
    (StatusCode::CREATED, Json(session))
}

async fn get_collab(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .tracker
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("collaboration session {} not found", session_id)))
}

async fn advance_phase(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<AdvancePhaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.tracker.advance_phase(&session_id, req.phase)?;
    Ok(Json(session))
}

async fn record_decision(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<RecordDecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let decision =
        state
            .tracker
            .record_decision(&session_id, &req.decision, req.made_by, &req.reasoning)?;
    Ok((StatusCode::CREATED, Json(decision)))
}

async fn end_collab(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<EndCollabRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.tracker.end(&session_id, req.outcomes)?;
    Ok(Json(session))
}

async fn send_message(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.tracker.send_message(
        &session_id,
        NewMessage {
            from_agent_id: req.from_agent_id,
            to_agent_id: req.to_agent_id,
            message_type: req.message_type,
            content: req.content,
            priority: req.priority,
            response_required: req.response_required,
        },
    )?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.tracker.messages(&session_id)?;
    Ok(Json(messages))
}

async fn record_memory(
    State(state): State<SharedState>,
    Json(req): Json<RecordMemoryRequest>,
) -> impl IntoResponse {
    let entry = state.memory.record(NewMemory {
        agent_id: req.agent_id,
        project_id: req.project_id,
        memory_type: req.memory_type,
        summary: req.summary,
        details: req.details,
        importance: req.importance,
    });
    (StatusCode::CREATED, Json(entry))
}

async fn recall_memory(
    State(state): State<SharedState>,
    Path(agent_id): Path<i64>,
    Query(query): Query<RecallQuery>,
) -> impl IntoResponse {
    Json(state.memory.recall(
        agent_id,
        query.project_id,
        query.memory_type,
        query.limit.unwrap_or(50),
    ))
}

async fn list_live_sessions(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.hub.sessions())
}
