//! Runtime configuration. Every heuristic constant the engines use lives here
//! with its default, so deployments can tune them without code changes.

use std::time::Duration;

use crate::envelope::Encoding;

pub const PROTOCOL_VERSION: &str = "0.2";

pub const MAX_MESSAGES_ENV: &str = "LRI_MAX_MESSAGES";
pub const SESSION_TTL_SECS_ENV: &str = "LRI_SESSION_TTL_SECS";
pub const SWEEP_INTERVAL_SECS_ENV: &str = "LRI_SWEEP_INTERVAL_SECS";
pub const COHERENCE_WINDOW_ENV: &str = "LRI_COHERENCE_WINDOW";
pub const AUTO_REVEAL_ENV: &str = "LRI_AUTO_REVEAL";
pub const HANDSHAKE_TIMEOUT_MS_ENV: &str = "LRI_HANDSHAKE_TIMEOUT_MS";
pub const SESSION_DURATION_SECS_ENV: &str = "LRI_SESSION_DURATION_SECS";
pub const ENCODINGS_ENV: &str = "LRI_ENCODINGS";
pub const FEATURES_ENV: &str = "LRI_FEATURES";
pub const SERVER_ID_ENV: &str = "LRI_SERVER_ID";

const MAX_MESSAGES_MIN: u64 = 2;
const MAX_MESSAGES_MAX: u64 = 1_000_000;
const SESSION_TTL_SECS_MIN: u64 = 1;
const SESSION_TTL_SECS_MAX: u64 = 30 * 24 * 3600;
const SWEEP_INTERVAL_SECS_MIN: u64 = 1;
const SWEEP_INTERVAL_SECS_MAX: u64 = 24 * 3600;
const COHERENCE_WINDOW_MIN: u64 = 2;
const COHERENCE_WINDOW_MAX: u64 = 1000;
const HANDSHAKE_TIMEOUT_MS_MIN: u64 = 100;
const HANDSHAKE_TIMEOUT_MS_MAX: u64 = 120_000;
const SESSION_DURATION_SECS_MIN: u64 = 1;
const SESSION_DURATION_SECS_MAX: u64 = 365 * 24 * 3600;

pub(crate) fn parse_env_u64_with_bounds(
    raw: Option<String>,
    min: u64,
    max: u64,
    default: u64,
) -> (u64, bool) {
    match raw.and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(parsed) => (parsed.clamp(min, max), true),
        None => (default, false),
    }
}

pub(crate) fn parse_env_bool_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

/// Comma separated list; blanks are dropped. `None` when unset or empty.
pub fn parse_env_list(raw: Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() { None } else { Some(items) }
}

fn read_u64(name: &str, min: u64, max: u64, default: u64) -> u64 {
    let raw = std::env::var(name).ok();
    let present = raw.as_deref().is_some_and(|v| !v.trim().is_empty());
    let (value, parsed) = parse_env_u64_with_bounds(raw, min, max, default);
    if present && !parsed {
        tracing::warn!(var = name, default, "invalid value, using default");
    }
    value
}

/// Window sizes, caps and weights for the awareness engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessConfig {
    /// Minutes for the recency term to decay by 1/e.
    pub recency_decay_minutes: f64,
    pub distraction_window: usize,
    /// Distinct-topic jumps at which the topic sub-score saturates.
    pub max_topic_jumps: usize,
    pub affect_variance_cap: f64,
    pub engagement_window: usize,
    pub max_rate_per_minute: f64,
    pub max_intent_diversity: usize,
    pub clarity_semantic_weight: f64,
    pub clarity_intent_weight: f64,
    pub clarity_affect_weight: f64,
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            recency_decay_minutes: 10.0,
            distraction_window: 5,
            max_topic_jumps: 4,
            affect_variance_cap: 0.5,
            engagement_window: 10,
            max_rate_per_minute: 2.0,
            max_intent_diversity: 4,
            clarity_semantic_weight: 0.5,
            clarity_intent_weight: 0.3,
            clarity_affect_weight: 0.2,
        }
    }
}

/// Lexical and structural thresholds for the obstacle engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleConfig {
    pub window: usize,
    pub vague_hits_saturation: f64,
    pub topic_penalty: f64,
    pub min_topic_len: usize,
    pub pleasure_swing: f64,
    pub word_limit: usize,
    pub word_excess_scale: f64,
    pub depth_limit: usize,
    pub depth_excess_scale: f64,
    pub depth_weight: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            window: 5,
            vague_hits_saturation: 3.0,
            topic_penalty: 0.5,
            min_topic_len: 3,
            pleasure_swing: 1.0,
            word_limit: 100,
            word_excess_scale: 200.0,
            depth_limit: 4,
            depth_excess_scale: 4.0,
            depth_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftConfig {
    pub min_coherence: f64,
    pub drop_threshold: f64,
    pub topic_shift_window: usize,
    /// Drift events kept per session.
    pub history_limit: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            min_coherence: 0.6,
            drop_threshold: 0.2,
            topic_shift_window: 5,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub max_messages: usize,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub coherence_window: usize,
    /// Evaluate termas after every `store`.
    pub auto_reveal: bool,
    pub awareness: AwarenessConfig,
    pub obstacles: ObstacleConfig,
    pub drift: DriftConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            session_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            coherence_window: 10,
            auto_reveal: true,
            awareness: AwarenessConfig::default(),
            obstacles: ObstacleConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_messages: read_u64(
                MAX_MESSAGES_ENV,
                MAX_MESSAGES_MIN,
                MAX_MESSAGES_MAX,
                defaults.max_messages as u64,
            ) as usize,
            session_ttl: Duration::from_secs(read_u64(
                SESSION_TTL_SECS_ENV,
                SESSION_TTL_SECS_MIN,
                SESSION_TTL_SECS_MAX,
                defaults.session_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(read_u64(
                SWEEP_INTERVAL_SECS_ENV,
                SWEEP_INTERVAL_SECS_MIN,
                SWEEP_INTERVAL_SECS_MAX,
                defaults.sweep_interval.as_secs(),
            )),
            coherence_window: read_u64(
                COHERENCE_WINDOW_ENV,
                COHERENCE_WINDOW_MIN,
                COHERENCE_WINDOW_MAX,
                defaults.coherence_window as u64,
            ) as usize,
            auto_reveal: parse_env_bool_flag(std::env::var(AUTO_REVEAL_ENV).ok(), true),
            ..defaults
        }
    }
}

/// Responder and initiator handshake settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeConfig {
    pub version: String,
    /// Supported encodings in preference order; the first is the fallback.
    pub encodings: Vec<Encoding>,
    pub features: Vec<String>,
    pub timeout: Duration,
    /// Session lifetime stamped into the seal. `None` means no expiry.
    pub session_duration: Option<Duration>,
    pub local_id: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            encodings: vec![Encoding::Json, Encoding::Cbor],
            features: vec!["ltp".to_string(), "lss".to_string()],
            timeout: Duration::from_millis(10_000),
            session_duration: None,
            local_id: None,
        }
    }
}

impl HandshakeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let encodings = match parse_env_list(std::env::var(ENCODINGS_ENV).ok()) {
            Some(raw) => {
                let parsed: Vec<Encoding> =
                    raw.iter().filter_map(|e| Encoding::parse(e)).collect();
                if parsed.is_empty() {
                    tracing::warn!(var = ENCODINGS_ENV, "no known encodings listed, using defaults");
                    defaults.encodings.clone()
                } else {
                    parsed
                }
            }
            None => defaults.encodings.clone(),
        };

        let session_duration = std::env::var(SESSION_DURATION_SECS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(|secs| {
                Duration::from_secs(secs.clamp(SESSION_DURATION_SECS_MIN, SESSION_DURATION_SECS_MAX))
            });

        Self {
            encodings,
            features: parse_env_list(std::env::var(FEATURES_ENV).ok())
                .unwrap_or(defaults.features.clone()),
            timeout: Duration::from_millis(read_u64(
                HANDSHAKE_TIMEOUT_MS_ENV,
                HANDSHAKE_TIMEOUT_MS_MIN,
                HANDSHAKE_TIMEOUT_MS_MAX,
                defaults.timeout.as_millis() as u64,
            )),
            session_duration,
            local_id: std::env::var(SERVER_ID_ENV)
                .ok()
                .filter(|id| !id.trim().is_empty()),
            ..defaults
        }
    }

    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = Some(duration);
        self
    }

    pub fn with_local_id(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_parse_clamps_and_flags_presence() {
        assert_eq!(
            parse_env_u64_with_bounds(Some("5".into()), 10, 20, 15),
            (10, true)
        );
        assert_eq!(
            parse_env_u64_with_bounds(Some("abc".into()), 10, 20, 15),
            (15, false)
        );
        assert_eq!(parse_env_u64_with_bounds(None, 10, 20, 15), (15, false));
    }

    #[test]
    fn bool_flag_accepts_common_truthy_values() {
        assert!(parse_env_bool_flag(Some("Yes".into()), false));
        assert!(!parse_env_bool_flag(Some("0".into()), true));
        assert!(parse_env_bool_flag(None, true));
    }

    #[test]
    fn list_parse_drops_blanks() {
        assert_eq!(
            parse_env_list(Some(" cbor, ,json ".into())),
            Some(vec!["cbor".to_string(), "json".to_string()])
        );
        assert_eq!(parse_env_list(Some(" , ".into())), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let store = StoreConfig::default();
        assert_eq!(store.max_messages, 1000);
        assert_eq!(store.session_ttl, Duration::from_secs(3600));
        assert_eq!(store.coherence_window, 10);
        assert!(store.auto_reveal);

        let handshake = HandshakeConfig::default();
        assert_eq!(handshake.encodings, vec![Encoding::Json, Encoding::Cbor]);
        assert_eq!(handshake.timeout, Duration::from_secs(10));
        assert!(handshake.session_duration.is_none());
    }
}
