//! Envelope signatures in compact JWS form (`header.payload.signature`).
//!
//! The primitive is pluggable through [`Signer`]/[`Verifier`]; [`HmacSigner`]
//! covers shared-secret deployments.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::envelope::Envelope;
use crate::error::{LriError, LriResult};

const SIGNATURE_TYPE: &str = "LCE";

pub trait Signer: Send + Sync {
    /// JWS `alg` value, e.g. `HS256`.
    fn algorithm(&self) -> &str;
    fn sign(&self, input: &[u8]) -> LriResult<Vec<u8>>;
}

pub trait Verifier: Send + Sync {
    fn algorithm(&self) -> &str;
    fn verify(&self, input: &[u8], signature: &[u8]) -> bool;
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the JWS signing input.
#[derive(Clone)]
pub struct HmacSigner {
    secret: Vec<u8>,
}

impl HmacSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> LriResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| LriError::Signature(e.to_string()))
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn algorithm(&self) -> &str {
        "HS256"
    }

    fn sign(&self, input: &[u8]) -> LriResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl Verifier for HmacSigner {
    fn algorithm(&self) -> &str {
        "HS256"
    }

    fn verify(&self, input: &[u8], signature: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(input);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

/// Sorted-key compact JSON of the envelope without its `sig` field.
/// `serde_json::Map` iterates in key order, so going through `Value` sorts.
pub fn canonical_bytes(envelope: &Envelope) -> LriResult<Vec<u8>> {
    let mut value = serde_json::to_value(envelope)?;
    if let Value::Object(map) = &mut value {
        map.remove("sig");
    }
    Ok(serde_json::to_vec(&value)?)
}

/// `alg` named by a JWS header segment.
fn header_algorithm(header_b64: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(header_b64).ok()?;
    let header: Value = serde_json::from_slice(&bytes).ok()?;
    header.get("alg")?.as_str().map(str::to_string)
}

/// Return a copy of `envelope` carrying a compact JWS over its canonical form.
pub fn sign_envelope(envelope: &Envelope, signer: &dyn Signer) -> LriResult<Envelope> {
    let header = serde_json::json!({"alg": signer.algorithm(), "typ": SIGNATURE_TYPE});
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(canonical_bytes(envelope)?);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = signer.sign(signing_input.as_bytes())?;

    let mut signed = envelope.clone();
    signed.signature = Some(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ));
    Ok(signed)
}

/// Check the envelope's `sig`: structure, header `alg`, payload match and
/// signature. Any failure yields `false`.
pub fn verify_envelope(envelope: &Envelope, verifier: &dyn Verifier) -> bool {
    let Some(jws) = envelope.signature.as_deref() else {
        return false;
    };
    let parts: Vec<&str> = jws.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return false;
    };

    if header_algorithm(header_b64).as_deref() != Some(verifier.algorithm()) {
        tracing::debug!(expected = verifier.algorithm(), "signature header names another alg");
        return false;
    }

    let Ok(expected) = canonical_bytes(envelope) else {
        return false;
    };
    match URL_SAFE_NO_PAD.decode(payload_b64) {
        Ok(actual) if actual == expected => {}
        _ => {
            tracing::debug!("envelope payload does not match signature payload");
            return false;
        }
    }

    let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64) else {
        return false;
    };
    let signing_input = format!("{header_b64}.{payload_b64}");
    verifier.verify(signing_input.as_bytes(), &signature)
}
