use std::sync::Arc;

use clap::Args;
use lri_core::Encoding;
use lri_core::config::HandshakeConfig;
use lri_core::signing::{HmacSigner, Verifier};
use lri_ws::{ClientOptions, Incoming, LriClient};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::envelope::parse_envelope;
use crate::util::{exit_error, payload_json};

#[derive(Args)]
pub struct ConnectArgs {
    /// WebSocket URL of the LRI node
    #[arg(long, env = "LRI_WS_URL", default_value = "ws://localhost:8765")]
    pub url: String,

    /// Thread to bind the session to
    #[arg(long, short = 't')]
    pub thread: Option<String>,

    /// Bind token
    #[arg(long, env = "LRI_BIND_TOKEN")]
    pub auth: Option<String>,

    /// Offered encodings in preference order (repeatable)
    #[arg(long = "encoding")]
    pub encodings: Vec<String>,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Shared secret used to verify the seal signature
    #[arg(long, env = "LRI_SIGNING_SECRET")]
    pub verify_secret: Option<String>,
}

/// Handshake, then send one envelope per stdin line and print received frames
/// as JSON lines until stdin closes or the server hangs up.
pub async fn run(args: ConnectArgs) -> i32 {
    let options = client_options(&args).unwrap_or_else(|e| exit_error(&e, None));
    let mut client = match LriClient::connect(&args.url, options).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!(
                "{}",
                json!({"error": "connection_error", "message": e.to_string(), "url": args.url})
            );
            return 3;
        }
    };
    println!("{}", json!({"sealed": client.connection()}));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            incoming = client.recv() => match incoming {
                Ok(Some(Incoming::Frame(frame))) => println!(
                    "{}",
                    json!({
                        "envelope": frame.envelope,
                        "payload": (!frame.payload.is_empty()).then(|| payload_json(&frame.payload)),
                    })
                ),
                Ok(Some(Incoming::Notice(notice))) => println!("{}", json!({"notice": notice})),
                Ok(None) => return 0,
                Err(e) => {
                    eprintln!("{}", json!({"error": "connection_error", "message": e.to_string()}));
                    return 3;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_envelope(&line) {
                    Ok(envelope) => {
                        if let Err(e) = client.send(&envelope, None).await {
                            eprintln!("{}", json!({"error": "connection_error", "message": e.to_string()}));
                            return 3;
                        }
                    }
                    Err(e) => eprintln!("{}", json!({"error": "invalid_envelope", "message": e})),
                },
                Ok(None) | Err(_) => {
                    if let Err(e) = client.close().await {
                        tracing::debug!(error = %e, "close failed");
                    }
                    return 0;
                }
            },
        }
    }
}

fn client_options(args: &ConnectArgs) -> Result<ClientOptions, String> {
    let mut handshake = HandshakeConfig {
        timeout: std::time::Duration::from_millis(args.timeout_ms),
        ..HandshakeConfig::default()
    };
    if !args.encodings.is_empty() {
        handshake.encodings = args
            .encodings
            .iter()
            .map(|raw| {
                Encoding::parse(&raw.to_lowercase())
                    .ok_or_else(|| format!("Unknown encoding '{raw}'"))
            })
            .collect::<Result<_, _>>()?;
    }
    Ok(ClientOptions {
        handshake,
        thread: args.thread.clone(),
        auth: args.auth.clone(),
        verifier: args
            .verify_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Arc::new(HmacSigner::new(secret)) as Arc<dyn Verifier>),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(encodings: &[&str]) -> ConnectArgs {
        ConnectArgs {
            url: "ws://localhost:8765".to_string(),
            thread: Some("t-1".to_string()),
            auth: None,
            encodings: encodings.iter().map(|e| e.to_string()).collect(),
            timeout_ms: 500,
            verify_secret: Some(String::new()),
        }
    }

    #[test]
    fn options_carry_offer_and_timeout() {
        let options = client_options(&args(&["CBOR", "json"])).unwrap();
        assert_eq!(options.handshake.encodings, vec![Encoding::Cbor, Encoding::Json]);
        assert_eq!(options.handshake.timeout.as_millis(), 500);
        assert_eq!(options.thread.as_deref(), Some("t-1"));
        assert!(options.verifier.is_none());
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(client_options(&args(&["xml"])).is_err());
    }
}
