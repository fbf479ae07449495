use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List live sessions with their scores
    List,
    /// Show one session with its full message history
    Get {
        /// Thread ID
        thread: String,
    },
    /// Aggregate statistics across sessions
    Stats,
    /// Coherence, awareness, obstacles and drift history of one session
    Metrics {
        /// Thread ID
        thread: String,
    },
    /// Delete a session and its history
    Delete {
        /// Thread ID
        thread: String,
    },
}

pub async fn run(api_url: &str, command: SessionCommands) -> i32 {
    let (method, path) = match command {
        SessionCommands::List => (reqwest::Method::GET, "/v1/sessions".to_string()),
        SessionCommands::Get { thread } => (reqwest::Method::GET, session_path(&thread, "")),
        SessionCommands::Stats => (reqwest::Method::GET, "/v1/sessions/stats".to_string()),
        SessionCommands::Metrics { thread } => {
            (reqwest::Method::GET, session_path(&thread, "/metrics"))
        }
        SessionCommands::Delete { thread } => {
            (reqwest::Method::DELETE, session_path(&thread, ""))
        }
    };
    api_request(api_url, method, &path, None, &[]).await
}

/// `/v1/sessions/{thread}{suffix}` with the thread percent-encoded.
pub fn session_path(thread: &str, suffix: &str) -> String {
    let mut encoded = String::with_capacity(thread.len());
    for byte in thread.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("/v1/sessions/{encoded}{suffix}")
}
