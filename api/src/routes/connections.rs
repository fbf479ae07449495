use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use lri_core::handshake::Connection;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/connections", get(list_connections))
}

/// Sealed WebSocket connections currently registered
#[utoipa::path(
    get,
    path = "/v1/connections",
    responses(
        (status = 200, description = "Live connections", body = Vec<Connection>)
    ),
    tag = "connections"
)]
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<Connection>> {
    Json(state.connections.connections().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, request, test_state};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn empty_when_nobody_connected() {
        let app = router().with_state(test_state());
        let response = app
            .oneshot(request("GET", "/v1/connections"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }
}
