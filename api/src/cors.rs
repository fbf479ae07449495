use axum::http::{HeaderName, HeaderValue, Method};
use lri_core::config::parse_env_list;
use lri_core::header::LCE_HEADER;
use tower_http::cors::CorsLayer;

pub const CORS_ORIGINS_ENV: &str = "LRI_CORS_ORIGINS";

/// Build a CORS layer from the `LRI_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`)
/// - Methods: GET, POST, DELETE, OPTIONS
/// - Headers: Authorization, Content-Type, LCE
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins(std::env::var(CORS_ORIGINS_ENV).ok())
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static(LCE_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

fn allowed_origins(raw: Option<String>) -> Vec<String> {
    parse_env_list(raw).unwrap_or_else(|| vec!["http://localhost:3000".to_string()])
}
