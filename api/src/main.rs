use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use lri_core::SessionStore;
use lri_core::config::StoreConfig;
use lri_core::lss::SessionEvent;
use lri_ws::{ConnectionManager, ServerOptions};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod cors;
mod error;
mod extract;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "LRI API",
        version = "0.1.0",
        description = "Session store, terma scheduler and live connections of an LRI node."
    ),
    paths(
        routes::health::health_check,
        routes::sessions::list_sessions,
        routes::sessions::session_stats,
        routes::sessions::get_session,
        routes::sessions::delete_session,
        routes::sessions::get_metrics,
        routes::sessions::post_message,
        routes::termas::list_termas,
        routes::termas::hide_terma,
        routes::termas::reveal_termas,
        routes::connections::list_connections,
    ),
    components(schemas(
        HealthResponse,
        lri_core::error::ApiError,
        lri_core::error::ValidationIssue,
        lri_core::Envelope,
        lri_core::handshake::Connection,
        lri_core::lss::CoherenceResult,
        lri_core::lss::AwarenessMetrics,
        lri_core::lss::ObstacleMetrics,
        lri_core::lss::DriftEvent,
        lri_core::lss::DriftKind,
        lri_core::lss::DriftSeverity,
        lri_core::lss::Terma,
        lri_core::lss::TermaType,
        lri_core::lss::RevealConditions,
        lri_core::lss::SessionContext,
        lri_core::lss::SessionMetrics,
        lri_core::lss::StoreStats,
        lri_core::lss::StoreOutcome,
        routes::sessions::SessionSummary,
        routes::sessions::SessionDetail,
        routes::sessions::MessageView,
        routes::termas::HideTermaRequest,
        routes::termas::RevealResponse,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: String,
    pub sessions: usize,
    pub connections: usize,
}

fn port_from_env(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(default)
}

fn app(state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::sessions::router())
        .merge(routes::termas::router())
        .merge(routes::connections::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors::build_cors_layer()),
        )
        .with_state(state)
}

/// Log drift, reveals and expiry as they happen.
fn spawn_event_log(store: &Arc<SessionStore>) {
    let store = store.clone();
    tokio::spawn(async move {
        let mut events = store.subscribe().await;
        while let Some(event) = events.recv().await {
            match &event {
                SessionEvent::MessageStored { .. } => {}
                SessionEvent::Drift(drift) => tracing::info!(
                    thread_id = %drift.thread_id,
                    kind = ?drift.kind,
                    severity = ?drift.severity,
                    "session drift"
                ),
                SessionEvent::TermaRevealed { thread_id, terma } => tracing::info!(
                    thread_id = %thread_id,
                    terma_id = %terma.id,
                    priority = terma.priority,
                    "terma revealed"
                ),
                SessionEvent::SessionExpired { thread_id } => {
                    tracing::info!(thread_id = %thread_id, "session expired")
                }
                SessionEvent::SessionDeleted { thread_id } => {
                    tracing::debug!(thread_id = %thread_id, "session deleted")
                }
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lri_api=debug,lri_ws=debug,lri_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let store = Arc::new(SessionStore::new(StoreConfig::from_env()));
    let _sweeper = store.spawn_sweeper();
    spawn_event_log(&store);

    let connections = ConnectionManager::new(store.clone(), ServerOptions::from_env());

    let ws_addr = SocketAddr::from(([0, 0, 0, 0], port_from_env("LRI_WS_PORT", 8765)));
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    tracing::info!("LRI WebSocket listening on {}", ws_addr);
    let ws_manager = connections.clone();
    tokio::spawn(async move {
        if let Err(err) = ws_manager.serve(ws_listener).await {
            tracing::error!(error = %err, "WebSocket listener stopped");
        }
    });

    let app = app(state::AppState::new(store, connections));

    let addr = SocketAddr::from(([0, 0, 0, 0], port_from_env("PORT", 3000)));
    tracing::info!("LRI API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind HTTP listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("HTTP server failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, request, test_state};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_counts() {
        let state = test_state();
        state
            .store
            .store(
                "t-1",
                lri_core::Envelope::new(lri_core::IntentType::Ask, lri_core::Consent::Private),
                None,
            )
            .await
            .unwrap();
        let response = app(state)
            .oneshot(request("GET", "/health"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["protocol_version"], "0.2");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let response = app(test_state())
            .oneshot(request("GET", "/api-doc/openapi.json"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert!(doc["paths"]["/v1/sessions/{thread_id}/messages"]["post"].is_object());
    }
}
