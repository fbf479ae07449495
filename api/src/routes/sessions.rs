use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{DateTime, Utc};
use lri_core::lss::{
    AwarenessMetrics, CoherenceResult, DriftEvent, ObstacleMetrics, Session, SessionMetrics,
    StoreOutcome, StoreStats, StoredMessage, Terma,
};
use lri_core::{Envelope, Payload};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::LceEnvelope;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/sessions/stats", get(session_stats))
        .route(
            "/v1/sessions/{thread_id}",
            get(get_session).delete(delete_session),
        )
        .route("/v1/sessions/{thread_id}/metrics", get(get_metrics))
        .route("/v1/sessions/{thread_id}/messages", post(post_message))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    pub thread_id: String,
    pub message_count: usize,
    pub coherence: f64,
    pub awareness: f64,
    pub obstacles: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            thread_id: session.thread_id.clone(),
            message_count: session.messages.len(),
            coherence: session.coherence.overall,
            awareness: session.awareness.overall,
            obstacles: session.obstacles.overall,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageView {
    pub envelope: Envelope,
    /// JSON payloads as-is, text as a string, other bytes as base64.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl From<&StoredMessage> for MessageView {
    fn from(message: &StoredMessage) -> Self {
        Self {
            envelope: message.envelope.clone(),
            payload: message.payload.as_ref().map(payload_view),
            received_at: message.received_at,
        }
    }
}

fn payload_view(payload: &Payload) -> serde_json::Value {
    payload
        .json()
        .or_else(|| payload.text().map(serde_json::Value::String))
        .unwrap_or_else(|| {
            serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(payload.to_bytes()),
            )
        })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetail {
    pub thread_id: String,
    pub messages: Vec<MessageView>,
    pub coherence: CoherenceResult,
    pub awareness: AwarenessMetrics,
    pub obstacles: ObstacleMetrics,
    pub termas: Vec<Terma>,
    pub drift_events: Vec<DriftEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionDetail {
    fn from(session: Session) -> Self {
        Self {
            messages: session.messages.iter().map(|m| MessageView::from(&**m)).collect(),
            thread_id: session.thread_id,
            coherence: session.coherence,
            awareness: session.awareness,
            obstacles: session.obstacles,
            termas: session.termas,
            drift_events: session.drift_events,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// List all live sessions with their current scores
#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "Session summaries", body = Vec<SessionSummary>)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let sessions = state.store.get_all_sessions().await?;
    Ok(Json(sessions.iter().map(SessionSummary::from).collect()))
}

/// Aggregate counts and average scores across sessions
#[utoipa::path(
    get,
    path = "/v1/sessions/stats",
    responses(
        (status = 200, description = "Store statistics", body = StoreStats)
    ),
    tag = "sessions"
)]
pub async fn session_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    Ok(Json(state.store.get_stats().await?))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{thread_id}",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    responses(
        (status = 200, description = "Full session", body = SessionDetail),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionDetail>, AppError> {
    let session = state
        .store
        .get_session(&thread_id)
        .await?
        .ok_or(AppError::NotFound { thread_id })?;
    Ok(Json(session.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{thread_id}",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_session(&thread_id).await? {
        tracing::info!(thread_id = %thread_id, "session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound { thread_id })
    }
}

/// Current and previous coherence, awareness, obstacles and drift history
#[utoipa::path(
    get,
    path = "/v1/sessions/{thread_id}/metrics",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    responses(
        (status = 200, description = "Session metrics", body = SessionMetrics),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "sessions"
)]
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionMetrics>, AppError> {
    let metrics = state
        .store
        .get_metrics(&thread_id)
        .await?
        .ok_or(AppError::NotFound { thread_id })?;
    Ok(Json(metrics))
}

/// Store one message: envelope in the `LCE` header, optional JSON body as payload
#[utoipa::path(
    post,
    path = "/v1/sessions/{thread_id}/messages",
    params(
        ("thread_id" = String, Path, description = "Conversation thread"),
        ("LCE" = String, Header, description = "Base64 JSON envelope")
    ),
    request_body(content = serde_json::Value, description = "Optional JSON payload", content_type = "application/json"),
    responses(
        (status = 201, description = "Stored; recomputed metrics", body = StoreOutcome),
        (status = 400, description = "Malformed header or body", body = lri_core::error::ApiError),
        (status = 422, description = "Envelope failed validation", body = lri_core::error::ApiError),
        (status = 428, description = "Missing LCE header", body = lri_core::error::ApiError)
    ),
    tag = "sessions"
)]
pub async fn post_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    LceEnvelope(envelope): LceEnvelope,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload = parse_payload(&body)?;
    let outcome = state.store.store(&thread_id, envelope, payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

fn parse_payload(body: &[u8]) -> Result<Option<Payload>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .map(|value| Some(Payload::Json(value)))
        .map_err(|err| AppError::Validation {
            message: format!("Payload is not JSON: {err}"),
            field: Some("body".to_string()),
            received: None,
            docs_hint: Some("Send the payload as a JSON document, or no body at all.".to_string()),
        })
}
