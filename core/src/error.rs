use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured error response — designed for agents, not humans.
/// Every error contains enough information for a caller to understand
/// what went wrong and how to fix it.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found", "lce_required")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the HTTP surface and the WebSocket error notices
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const LCE_REQUIRED: &str = "lce_required";
    pub const LCE_MALFORMED: &str = "lce_malformed";
    pub const INVALID_FRAME: &str = "invalid_frame";
    pub const PROTOCOL_ERROR: &str = "protocol_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
}

/// A single schema violation, addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Handshake violations. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed handshake message: {0}")]
    Malformed(String),
    #[error("unexpected '{received}' while {state}")]
    OutOfOrder {
        received: &'static str,
        state: &'static str,
    },
    #[error("hello must propose at least one encoding")]
    NoEncodings,
    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("data frame received before the handshake was sealed")]
    FrameBeforeSeal,
    #[error("handshake already failed")]
    AlreadyFailed,
    #[error("seal signature rejected")]
    BadSealSignature,
    #[error("connection closed during handshake")]
    Closed,
}

/// Errors decoding a single data frame. Fatal to that read only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too small: {0} bytes, need at least 4")]
    TooSmall(usize),
    #[error("invalid frame: declared envelope length {declared} exceeds {available} available bytes")]
    Truncated { declared: usize, available: usize },
    #[error("invalid frame: envelope length {0} exceeds the {1} byte limit")]
    Oversized(usize, usize),
    #[error("invalid frame: envelope could not be decoded: {0}")]
    Envelope(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LriError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("session not found for thread '{thread_id}'")]
    NotFound { thread_id: String },
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("envelope failed validation ({} issue(s))", .0.len())]
    Validation(Vec<ValidationIssue>),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("signature error: {0}")]
    Signature(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl LriError {
    pub fn not_found(thread_id: impl Into<String>) -> Self {
        LriError::NotFound {
            thread_id: thread_id.into(),
        }
    }

    /// Whether the connection that produced this error must be closed.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            LriError::Protocol(_)
                | LriError::Authentication(_)
                | LriError::Timeout(_)
                | LriError::Transport(_)
        )
    }

    /// Machine-readable code reported to the peer in an error notice.
    pub fn code(&self) -> &'static str {
        match self {
            LriError::Protocol(_) | LriError::Timeout(_) => codes::PROTOCOL_ERROR,
            LriError::Authentication(_) => codes::UNAUTHORIZED,
            LriError::Frame(_) | LriError::Codec(_) => codes::INVALID_FRAME,
            LriError::Validation(_) => codes::VALIDATION_FAILED,
            LriError::NotFound { .. } => codes::NOT_FOUND,
            LriError::Storage(_) | LriError::Signature(_) | LriError::Transport(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// Human-readable detail; validation failures list every issue.
    pub fn detail(&self) -> String {
        match self {
            LriError::Validation(issues) => issues
                .iter()
                .map(|i| format!("{}: {}", i.path, i.message))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for LriError {
    fn from(err: serde_json::Error) -> Self {
        LriError::Codec(err.to_string())
    }
}

impl From<serde_cbor::Error> for LriError {
    fn from(err: serde_cbor::Error) -> Self {
        LriError::Codec(err.to_string())
    }
}

pub type LriResult<T> = Result<T, LriError>;
