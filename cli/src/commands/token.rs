//! Bind tokens for `LRI_AUTH_TOKENS` / `LRI_AUTH_TOKEN_HASHES` (local).

use clap::Subcommand;
use lri_core::auth::{AUTH_TOKEN_HASHES_ENV, generate_bind_token, hash_token};
use serde_json::json;

use crate::util::pretty;

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Generate a new bind token and the digest the server should hold
    Generate,
    /// Print the SHA-256 digest of an existing token
    Hash {
        /// Token as sent in `bind.auth`
        token: String,
    },
}

pub fn run(command: TokenCommands) -> i32 {
    let output = match command {
        TokenCommands::Generate => {
            let (token, sha256) = generate_bind_token();
            json!({
                "token": token,
                "sha256": sha256,
                "env": AUTH_TOKEN_HASHES_ENV,
            })
        }
        TokenCommands::Hash { token } => json!({ "sha256": hash_token(&token) }),
    };
    println!("{}", pretty(&output));
    0
}
