use clap::Args;
use lri_core::header::{LCE_HEADER, encode_header};
use lri_core::validator::validate_envelope;
use lri_core::{Consent, Envelope, IntentType};

use crate::commands::session::session_path;
use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Args)]
pub struct SendArgs {
    /// Thread ID to store the message under
    pub thread: String,

    /// Intent type (ask, tell, propose, confirm, notify, sync, plan, agree, disagree, reflect)
    #[arg(long, short = 'i', default_value = "tell")]
    pub intent: String,

    /// Consent level (private, team, public)
    #[arg(long, default_value = "private")]
    pub consent: String,

    /// Free-form goal
    #[arg(long)]
    pub goal: Option<String>,

    /// Conversation topic
    #[arg(long, short = 't')]
    pub topic: Option<String>,

    /// Affect as pleasure,arousal,dominance in [-1,1] (e.g. 0.3,0.1,0)
    #[arg(long, allow_hyphen_values = true)]
    pub pad: Option<String>,

    /// Payload as JSON string
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Read payload from file (use '-' for stdin)
    #[arg(long, short = 'f', conflicts_with = "data")]
    pub data_file: Option<String>,
}

pub async fn run(api_url: &str, args: SendArgs) -> i32 {
    let envelope = build_envelope(&args).unwrap_or_else(|e| {
        exit_error(&e, Some("Check the envelope locally with `lri validate`."))
    });
    let header = encode_header(&envelope).unwrap_or_else(|e| exit_error(&e.to_string(), None));

    let body = if let Some(ref d) = args.data {
        Some(
            serde_json::from_str(d)
                .unwrap_or_else(|e| exit_error(&format!("Invalid JSON in --data: {e}"), None)),
        )
    } else if let Some(ref f) = args.data_file {
        Some(read_json_from_file(f).unwrap_or_else(|e| exit_error(&e, None)))
    } else {
        None
    };

    api_request(
        api_url,
        reqwest::Method::POST,
        &session_path(&args.thread, "/messages"),
        body,
        &[(LCE_HEADER.to_string(), header)],
    )
    .await
}

pub fn parse_consent(raw: &str) -> Result<Consent, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("Unknown consent '{raw}' (expected private, team or public)"))
}

pub fn parse_pad(raw: &str) -> Result<[f64; 3], String> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Invalid --pad '{raw}': {e}"))?;
    match values.as_slice() {
        [p, a, d] => Ok([*p, *a, *d]),
        _ => Err(format!("Invalid --pad '{raw}': expected three comma-separated numbers")),
    }
}

fn build_envelope(args: &SendArgs) -> Result<Envelope, String> {
    let intent = IntentType::from(args.intent.to_lowercase());
    if !intent.is_known() {
        return Err(format!("Unknown intent '{}'", args.intent));
    }
    let mut envelope = Envelope::new(intent, parse_consent(&args.consent)?).with_thread(&args.thread);
    if let Some(goal) = &args.goal {
        envelope = envelope.with_goal(goal);
    }
    if let Some(topic) = &args.topic {
        envelope = envelope.with_topic(topic);
    }
    if let Some(pad) = &args.pad {
        let [p, a, d] = parse_pad(pad)?;
        envelope = envelope.with_pad(p, a, d);
    }

    let value = serde_json::to_value(&envelope).map_err(|e| e.to_string())?;
    validate_envelope(&value).map_err(|issues| {
        issues
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    })?;
    Ok(envelope)
}
