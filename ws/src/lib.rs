//! WebSocket transport for LRI: a responder-side [`ConnectionManager`] that
//! drives the handshake and feeds frames into a [`lri_core::SessionStore`],
//! and an initiator-side [`LriClient`].

pub mod client;
pub mod server;

use lri_core::LriError;
use serde_json::json;
use tokio_tungstenite::tungstenite;

pub use client::{ClientOptions, Incoming, LriClient};
pub use server::{ConnectionManager, ServerOptions};

pub(crate) fn transport_error(err: tungstenite::Error) -> LriError {
    LriError::Transport(err.to_string())
}

/// JSON text notice sent to a peer when one of its messages was rejected.
pub(crate) fn error_notice(code: &str, message: impl Into<String>) -> String {
    json!({
        "error": code,
        "message": message.into(),
    })
    .to_string()
}
