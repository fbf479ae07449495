use base64::Engine;

use crate::envelope::Envelope;
use crate::error::{LriError, LriResult};
use crate::validator::validate_envelope;

/// HTTP header carrying a base64 JSON envelope.
pub const LCE_HEADER: &str = "lce";

/// Base64 of the envelope's compact JSON (absent sections omitted).
pub fn encode_header(envelope: &Envelope) -> LriResult<String> {
    let json = serde_json::to_vec(envelope)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Decode a header value. Malformed base64/JSON yields `Codec`, schema
/// violations yield `Validation` (only when `validate` is set).
pub fn decode_header(value: &str, validate: bool) -> LriResult<Envelope> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| LriError::Codec(format!("invalid base64: {e}")))?;
    let data: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|e| LriError::Codec(format!("invalid JSON: {e}")))?;

    if validate {
        validate_envelope(&data).map_err(LriError::Validation)?;
    }

    serde_json::from_value(data).map_err(|e| LriError::Codec(format!("invalid envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Consent, IntentType};

    #[test]
    fn header_roundtrip() {
        let env = Envelope::new(IntentType::Ask, Consent::Private).with_topic("weather");
        let header = encode_header(&env).unwrap();
        assert_eq!(decode_header(&header, true).unwrap(), env);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            decode_header("%%%not-base64", true),
            Err(LriError::Codec(_))
        ));
        let not_json = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert!(matches!(
            decode_header(&not_json, true),
            Err(LriError::Codec(_))
        ));
    }

    #[test]
    fn invalid_envelope_is_a_validation_error() {
        let raw = base64::engine::general_purpose::STANDARD
            .encode(br#"{"v":1,"intent":{"type":"shout"},"policy":{"consent":"private"}}"#);
        match decode_header(&raw, true) {
            Err(LriError::Validation(issues)) => assert_eq!(issues[0].path, "/intent/type"),
            other => panic!("expected validation error, got {other:?}"),
        }
        // Without validation the unknown intent is carried through.
        let env = decode_header(&raw, false).unwrap();
        assert_eq!(env.intent.kind.as_str(), "shout");
    }
}
