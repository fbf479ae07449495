use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lri_core::error::{self, ApiError, LriError, ValidationIssue};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// No session for the thread (404)
    NotFound { thread_id: String },
    /// Message posted without an LCE header (428)
    LceRequired,
    /// LCE header is not base64 JSON (400)
    LceMalformed(String),
    /// LCE header decodes but violates the envelope schema (422)
    LceInvalid(Vec<ValidationIssue>),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { thread_id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("No session for thread '{thread_id}'"),
                    field: Some("thread_id".to_string()),
                    received: Some(serde_json::Value::String(thread_id)),
                    request_id,
                    docs_hint: Some(
                        "Sessions are created by the first message posted to a thread."
                            .to_string(),
                    ),
                },
            ),
            AppError::LceRequired => (
                StatusCode::PRECONDITION_REQUIRED,
                ApiError {
                    error: error::codes::LCE_REQUIRED.to_string(),
                    message: "Missing LCE header".to_string(),
                    field: Some("lce".to_string()),
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "Send the envelope as base64 JSON in the `LCE` header (`lri header encode`)."
                            .to_string(),
                    ),
                },
            ),
            AppError::LceMalformed(reason) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::LCE_MALFORMED.to_string(),
                    message: format!("Malformed LCE header: {reason}"),
                    field: Some("lce".to_string()),
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::LceInvalid(issues) => {
                let first = issues.first().map(|issue| issue.path.clone());
                let message = issues
                    .iter()
                    .map(|issue| format!("{}: {}", issue.path, issue.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiError {
                        error: error::codes::VALIDATION_FAILED.to_string(),
                        message: format!("Invalid LCE envelope: {message}"),
                        field: first,
                        received: serde_json::to_value(&issues).ok(),
                        request_id,
                        docs_hint: Some(
                            "Check the envelope locally with `lri validate`.".to_string(),
                        ),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<LriError> for AppError {
    fn from(err: LriError) -> Self {
        match err {
            LriError::NotFound { thread_id } => AppError::NotFound { thread_id },
            LriError::Validation(issues) => AppError::LceInvalid(issues),
            LriError::Codec(reason) => AppError::LceMalformed(reason),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let status = |err: LriError| AppError::from(err).into_response().status();
        assert_eq!(status(LriError::not_found("t-1")), StatusCode::NOT_FOUND);
        assert_eq!(
            status(LriError::Validation(vec![ValidationIssue::new("/v", "must be 1")])),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(LriError::Codec("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(LriError::Storage("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
