//! Structural validation of raw envelope JSON before it is deserialized.
//!
//! The engines never depend on this: scoring degrades gracefully on anything
//! that deserializes. Transports call it to reject envelopes early with
//! precise JSON-pointer paths.

use serde_json::Value;

use crate::envelope::{IntentType, LCE_VERSION};
use crate::error::ValidationIssue;

const CONSENT_LEVELS: [&str; 3] = ["private", "team", "public"];

/// Validate envelope JSON. `Ok(())` when valid, otherwise every issue found.
pub fn validate_envelope(data: &Value) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let Some(obj) = data.as_object() else {
        return Err(vec![ValidationIssue::new("", "Envelope must be an object")]);
    };

    match obj.get("v") {
        None => issues.push(ValidationIssue::new("/v", "Required field 'v' missing")),
        Some(v) if v.as_u64() != Some(LCE_VERSION as u64) => {
            issues.push(ValidationIssue::new("/v", "Version must be 1"))
        }
        Some(_) => {}
    }

    match obj.get("intent") {
        None => issues.push(ValidationIssue::new(
            "/intent",
            "Required field 'intent' missing",
        )),
        Some(Value::Object(intent)) => match intent.get("type") {
            None => issues.push(ValidationIssue::new(
                "/intent/type",
                "Required field 'type' missing",
            )),
            Some(Value::String(kind)) if IntentType::from(kind.as_str()).is_known() => {}
            Some(_) => {
                let valid: Vec<&str> = IntentType::KNOWN.iter().map(|k| k.as_str()).collect();
                issues.push(ValidationIssue::new(
                    "/intent/type",
                    format!("Invalid intent type. Must be one of: {}", valid.join(", ")),
                ));
            }
        },
        Some(_) => issues.push(ValidationIssue::new("/intent", "Intent must be an object")),
    }

    match obj.get("policy") {
        None => issues.push(ValidationIssue::new(
            "/policy",
            "Required field 'policy' missing",
        )),
        Some(Value::Object(policy)) => match policy.get("consent") {
            None => issues.push(ValidationIssue::new(
                "/policy/consent",
                "Required field 'consent' missing",
            )),
            Some(Value::String(level)) if CONSENT_LEVELS.contains(&level.as_str()) => {}
            Some(_) => issues.push(ValidationIssue::new(
                "/policy/consent",
                format!(
                    "Invalid consent level. Must be one of: {}",
                    CONSENT_LEVELS.join(", ")
                ),
            )),
        },
        Some(_) => issues.push(ValidationIssue::new("/policy", "Policy must be an object")),
    }

    if let Some(Value::Object(affect)) = obj.get("affect")
        && let Some(pad) = affect.get("pad")
    {
        match pad.as_array() {
            Some(values) if values.len() == 3 => {
                let in_range = values
                    .iter()
                    .all(|x| x.as_f64().is_some_and(|f| (-1.0..=1.0).contains(&f)));
                if !in_range {
                    issues.push(ValidationIssue::new(
                        "/affect/pad",
                        "PAD values must be numbers in range [-1, 1]",
                    ));
                }
            }
            _ => issues.push(ValidationIssue::new(
                "/affect/pad",
                "PAD must be array of 3 numbers",
            )),
        }
    }

    if let Some(Value::Object(qos)) = obj.get("qos")
        && let Some(coherence) = qos.get("coherence")
        && !coherence
            .as_f64()
            .is_some_and(|c| (0.0..=1.0).contains(&c))
    {
        issues.push(ValidationIssue::new(
            "/qos/coherence",
            "Coherence must be number in range [0, 1]",
        ));
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(result: Result<(), Vec<ValidationIssue>>) -> Vec<String> {
        result
            .unwrap_err()
            .into_iter()
            .map(|issue| issue.path)
            .collect()
    }

    #[test]
    fn minimal_envelope_is_valid() {
        let data = json!({"v": 1, "intent": {"type": "ask"}, "policy": {"consent": "private"}});
        assert!(validate_envelope(&data).is_ok());
    }

    #[test]
    fn missing_required_fields_are_all_reported() {
        assert_eq!(paths(validate_envelope(&json!({}))), vec!["/v", "/intent", "/policy"]);
    }

    #[test]
    fn wrong_version_and_unknown_intent_are_rejected() {
        let data = json!({"v": 2, "intent": {"type": "shout"}, "policy": {"consent": "private"}});
        assert_eq!(paths(validate_envelope(&data)), vec!["/v", "/intent/type"]);
    }

    #[test]
    fn invalid_consent_is_rejected() {
        let data = json!({"v": 1, "intent": {"type": "tell"}, "policy": {"consent": "world"}});
        assert_eq!(paths(validate_envelope(&data)), vec!["/policy/consent"]);
    }

    #[test]
    fn pad_must_have_three_values_in_range() {
        let short = json!({
            "v": 1, "intent": {"type": "tell"}, "policy": {"consent": "team"},
            "affect": {"pad": [0.1, 0.2]}
        });
        assert_eq!(paths(validate_envelope(&short)), vec!["/affect/pad"]);

        let out_of_range = json!({
            "v": 1, "intent": {"type": "tell"}, "policy": {"consent": "team"},
            "affect": {"pad": [0.1, 0.2, 1.5]}
        });
        assert_eq!(paths(validate_envelope(&out_of_range)), vec!["/affect/pad"]);
    }

    #[test]
    fn qos_coherence_must_be_unit_interval() {
        let data = json!({
            "v": 1, "intent": {"type": "tell"}, "policy": {"consent": "public"},
            "qos": {"coherence": 1.2}
        });
        assert_eq!(paths(validate_envelope(&data)), vec!["/qos/coherence"]);
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(paths(validate_envelope(&json!([1, 2]))), vec![""]);
    }
}
