use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use lri_core::lss::{RevealConditions, Terma, TermaType};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/sessions/{thread_id}/termas",
            get(list_termas).post(hide_terma),
        )
        .route("/v1/sessions/{thread_id}/termas/reveal", post(reveal_termas))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HideTermaRequest {
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: TermaType,
    #[serde(default)]
    pub reveal_conditions: RevealConditions,
    /// 0-10, higher first; capped at 10
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_kind() -> TermaType {
    TermaType::Insight
}

fn default_priority() -> u8 {
    5
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevealResponse {
    pub revealed: Vec<Terma>,
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{thread_id}/termas",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    responses(
        (status = 200, description = "Hidden and revealed termas", body = Vec<Terma>),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "termas"
)]
pub async fn list_termas(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<Terma>>, AppError> {
    Ok(Json(state.store.termas(&thread_id).await?))
}

/// Hide content against the session's current state
#[utoipa::path(
    post,
    path = "/v1/sessions/{thread_id}/termas",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    request_body = HideTermaRequest,
    responses(
        (status = 201, description = "Terma hidden", body = Terma),
        (status = 400, description = "Invalid request body", body = lri_core::error::ApiError),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "termas"
)]
pub async fn hide_terma(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    AppJson(req): AppJson<HideTermaRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::Validation {
            message: "content must not be empty".to_string(),
            field: Some("content".to_string()),
            received: Some(serde_json::Value::String(req.content)),
            docs_hint: None,
        });
    }
    let terma = state
        .store
        .hide(
            &thread_id,
            req.content,
            req.kind,
            req.reveal_conditions,
            req.priority,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(terma)))
}

/// Release every terma whose conditions hold now
#[utoipa::path(
    post,
    path = "/v1/sessions/{thread_id}/termas/reveal",
    params(("thread_id" = String, Path, description = "Conversation thread")),
    responses(
        (status = 200, description = "Termas released by this call, highest priority first", body = RevealResponse),
        (status = 404, description = "Unknown thread", body = lri_core::error::ApiError)
    ),
    tag = "termas"
)]
pub async fn reveal_termas(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<RevealResponse>, AppError> {
    let revealed = state.store.reveal(&thread_id).await?;
    if !revealed.is_empty() {
        tracing::info!(thread_id = %thread_id, count = revealed.len(), "termas revealed");
    }
    Ok(Json(RevealResponse { revealed }))
}
