use std::collections::HashSet;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::parse_env_list;
use crate::handshake::Bind;

pub const AUTH_TOKENS_ENV: &str = "LRI_AUTH_TOKENS";
pub const AUTH_TOKEN_HASHES_ENV: &str = "LRI_AUTH_TOKEN_HASHES";

/// Generate a bearer token for `bind.auth`. Returns `(full_token, sha256_hash)`.
/// Format: `lri_bt_` + 32 random bytes hex-encoded.
pub fn generate_bind_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("lri_bt_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen()).collect();
    hex::encode(bytes)
}

/// Decides whether a Bind may proceed to Seal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, bind: &Bind) -> bool;
}

/// Accepts every bind.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _bind: &Bind) -> bool {
        true
    }
}

/// Accepts binds whose `auth` token hashes to a known digest.
/// Only digests are held in memory.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    token_hashes: HashSet<String>,
}

impl TokenAuthenticator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            token_hashes: tokens.into_iter().map(|t| hash_token(t.as_ref())).collect(),
        }
    }

    pub fn from_hashes<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            token_hashes: hashes.into_iter().collect(),
        }
    }

    /// Tokens from `LRI_AUTH_TOKENS` plus digests from `LRI_AUTH_TOKEN_HASHES`.
    /// `None` when both are unset, meaning binds are not authenticated.
    pub fn from_env() -> Option<Self> {
        Self::from_lists(
            parse_env_list(std::env::var(AUTH_TOKENS_ENV).ok()),
            parse_env_list(std::env::var(AUTH_TOKEN_HASHES_ENV).ok()),
        )
    }

    fn from_lists(tokens: Option<Vec<String>>, hashes: Option<Vec<String>>) -> Option<Self> {
        if tokens.is_none() && hashes.is_none() {
            return None;
        }
        let mut auth = Self::new(tokens.unwrap_or_default());
        auth.token_hashes.extend(
            Self::from_hashes(
                hashes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|hash| hash.to_ascii_lowercase()),
            )
            .token_hashes,
        );
        Some(auth)
    }

    pub fn len(&self) -> usize {
        self.token_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_hashes.is_empty()
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, bind: &Bind) -> bool {
        match bind.auth.as_deref() {
            Some(token) => self.token_hashes.contains(&hash_token(token)),
            None => false,
        }
    }
}
