//! Local envelope tooling: header codec, schema validation, frame codec.

use clap::Subcommand;
use lri_core::frame::{decode_frame, encode_frame};
use lri_core::header::{decode_header, encode_header};
use lri_core::validator::validate_envelope;
use lri_core::{Encoding, Envelope, Payload};
use serde_json::json;

use crate::util::{exit_error, payload_json, pretty, read_input, read_json_from_file};

#[derive(Subcommand)]
pub enum HeaderCommands {
    /// Encode an envelope JSON file as an LCE header value
    Encode {
        /// Envelope JSON file (use '-' for stdin)
        file: String,
    },
    /// Decode an LCE header value back to envelope JSON
    Decode {
        /// Base64 header value
        value: String,
        /// Skip schema validation
        #[arg(long)]
        no_validate: bool,
    },
}

#[derive(Subcommand)]
pub enum FrameCommands {
    /// Encode an envelope (and optional payload) as a hex frame
    Encode {
        /// Envelope JSON file (use '-' for stdin)
        file: String,
        /// Payload text appended after the envelope
        #[arg(long)]
        payload: Option<String>,
        /// Envelope encoding (json, cbor)
        #[arg(long, default_value = "json")]
        encoding: String,
    },
    /// Decode a hex frame into envelope and payload
    Decode {
        /// Frame bytes as hex
        hex: String,
        /// Envelope encoding (json, cbor)
        #[arg(long, default_value = "json")]
        encoding: String,
    },
}

pub fn header(command: HeaderCommands) -> i32 {
    match command {
        HeaderCommands::Encode { file } => {
            let envelope = load_envelope(&file).unwrap_or_else(|e| exit_error(&e, None));
            match encode_header(&envelope) {
                Ok(value) => {
                    println!("{value}");
                    0
                }
                Err(e) => exit_error(&e.to_string(), None),
            }
        }
        HeaderCommands::Decode { value, no_validate } => match decode_header(&value, !no_validate) {
            Ok(envelope) => print_json(&json!(envelope)),
            Err(e) => {
                eprintln!("{}", pretty(&json!({"error": "lce_malformed", "message": e.to_string()})));
                1
            }
        },
    }
}

/// Exit 0 when the envelope is valid, 1 with the issue list otherwise.
pub fn validate(file: &str) -> i32 {
    let value = read_json_from_file(file).unwrap_or_else(|e| exit_error(&e, None));
    match validate_envelope(&value) {
        Ok(()) => print_json(&json!({"valid": true})),
        Err(issues) => {
            eprintln!("{}", pretty(&json!({"valid": false, "issues": issues})));
            1
        }
    }
}

pub fn frame(command: FrameCommands) -> i32 {
    match command {
        FrameCommands::Encode {
            file,
            payload,
            encoding,
        } => {
            let encoding = parse_encoding(&encoding);
            let envelope = load_envelope(&file).unwrap_or_else(|e| exit_error(&e, None));
            let payload = payload.map(Payload::from);
            match encode_frame(&envelope, payload.as_ref(), encoding) {
                Ok(bytes) => {
                    println!("{}", hex::encode(bytes));
                    0
                }
                Err(e) => exit_error(&e.to_string(), None),
            }
        }
        FrameCommands::Decode { hex, encoding } => {
            let encoding = parse_encoding(&encoding);
            let bytes = hex::decode(hex.trim())
                .unwrap_or_else(|e| exit_error(&format!("Invalid hex: {e}"), None));
            match decode_frame(&bytes, encoding) {
                Ok(frame) => print_json(&json!({
                    "envelope": frame.envelope,
                    "payload": (!frame.payload.is_empty()).then(|| payload_json(&frame.payload)),
                })),
                Err(e) => {
                    eprintln!("{}", pretty(&json!({"error": "invalid_frame", "message": e.to_string()})));
                    1
                }
            }
        }
    }
}

fn parse_encoding(raw: &str) -> Encoding {
    Encoding::parse(&raw.to_lowercase()).unwrap_or_else(|| {
        exit_error(
            &format!("Unknown encoding '{raw}'"),
            Some("Use --encoding json or --encoding cbor."),
        )
    })
}

/// Read, validate and parse an envelope document.
fn load_envelope(path: &str) -> Result<Envelope, String> {
    let raw = read_input(path)?;
    parse_envelope(&raw)
}

pub fn parse_envelope(raw: &str) -> Result<Envelope, String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {e}"))?;
    validate_envelope(&value).map_err(|issues| {
        issues
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    })?;
    serde_json::from_value(value).map_err(|e| format!("Invalid envelope: {e}"))
}

fn print_json(value: &serde_json::Value) -> i32 {
    println!("{}", pretty(value));
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use lri_core::IntentType;

    #[test]
    fn parse_envelope_validates_first() {
        let envelope =
            parse_envelope(r#"{"v":1,"intent":{"type":"ask"},"policy":{"consent":"private"}}"#)
                .unwrap();
        assert_eq!(envelope.intent_type(), &IntentType::Ask);

        let err = parse_envelope(r#"{"v":1,"intent":{"type":"ask"}}"#).unwrap_err();
        assert!(err.contains("/policy"), "{err}");
        assert!(parse_envelope("{").is_err());
    }
}
