use clap::Subcommand;
use lri_core::lss::RevealConditions;
use serde_json::json;

use crate::commands::session::session_path;
use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum TermaCommands {
    /// Hide content until its reveal conditions hold
    Hide {
        /// Thread ID (must already have a session)
        thread: String,
        /// Content to hide
        content: String,
        /// Terma type (insight, pattern, warning, breakthrough)
        #[arg(long = "type", default_value = "insight")]
        kind: String,
        /// Priority 0-10, higher first
        #[arg(long, default_value_t = 5)]
        priority: u8,
        /// Minimum delay after hiding, in milliseconds
        #[arg(long)]
        time_delay_ms: Option<u64>,
        /// Minimum topic similarity with the hidden topic (0-1)
        #[arg(long)]
        topic_match: Option<f64>,
        /// Intents that may trigger the reveal (repeatable)
        #[arg(long = "intent")]
        intent_match: Vec<String>,
        /// Minimum session coherence
        #[arg(long)]
        coherence_threshold: Option<f64>,
        /// Minimum session awareness
        #[arg(long)]
        awareness_threshold: Option<f64>,
        /// Maximum tolerated obstacle level
        #[arg(long)]
        obstacles_threshold: Option<f64>,
    },
    /// Reveal every terma whose conditions hold now
    Reveal {
        /// Thread ID
        thread: String,
    },
    /// List hidden and revealed termas
    List {
        /// Thread ID
        thread: String,
    },
}

pub async fn run(api_url: &str, command: TermaCommands) -> i32 {
    match command {
        TermaCommands::Hide {
            thread,
            content,
            kind,
            priority,
            time_delay_ms,
            topic_match,
            intent_match,
            coherence_threshold,
            awareness_threshold,
            obstacles_threshold,
        } => {
            let conditions = RevealConditions {
                time_delay_ms,
                topic_match,
                intent_match: (!intent_match.is_empty()).then_some(intent_match),
                coherence_threshold,
                awareness_threshold,
                obstacles_threshold,
            };
            let body = hide_body(&content, &kind, priority, &conditions)
                .unwrap_or_else(|e| exit_error(&e, None));
            api_request(
                api_url,
                reqwest::Method::POST,
                &session_path(&thread, "/termas"),
                Some(body),
                &[],
            )
            .await
        }
        TermaCommands::Reveal { thread } => {
            api_request(
                api_url,
                reqwest::Method::POST,
                &session_path(&thread, "/termas/reveal"),
                None,
                &[],
            )
            .await
        }
        TermaCommands::List { thread } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &session_path(&thread, "/termas"),
                None,
                &[],
            )
            .await
        }
    }
}

fn hide_body(
    content: &str,
    kind: &str,
    priority: u8,
    conditions: &RevealConditions,
) -> Result<serde_json::Value, String> {
    let kind = kind.to_lowercase();
    if !matches!(kind.as_str(), "insight" | "pattern" | "warning" | "breakthrough") {
        return Err(format!(
            "Unknown terma type '{kind}' (expected insight, pattern, warning or breakthrough)"
        ));
    }
    Ok(json!({
        "content": content,
        "type": kind,
        "priority": priority,
        "reveal_conditions": conditions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hide_body_omits_absent_conditions() {
        let conditions = RevealConditions {
            coherence_threshold: Some(0.7),
            ..Default::default()
        };
        let body = hide_body("look back", "Pattern", 7, &conditions).unwrap();
        assert_eq!(body["type"], "pattern");
        assert_eq!(
            body["reveal_conditions"],
            json!({"coherence_threshold": 0.7})
        );
    }

    #[test]
    fn hide_body_rejects_unknown_type() {
        assert!(hide_body("x", "secret", 5, &RevealConditions::default()).is_err());
    }
}
