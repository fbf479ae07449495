//! Communication impediments from lexical and structural heuristics.
//! Every score is in [0, 1] and higher is worse.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::config::ObstacleConfig;
use crate::envelope::IntentType;

use super::storage::StoredMessage;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").expect("valid word regex"));

const VAGUE_WORDS: &[&str] = &[
    "thing",
    "things",
    "stuff",
    "something",
    "somehow",
    "somewhat",
    "maybe",
    "perhaps",
    "probably",
    "possibly",
    "kinda",
    "sorta",
    "whatever",
    "etc",
    "various",
    "certain",
    "basically",
    "anyway",
];

const GENERIC_TOPICS: &[&str] = &[
    "general",
    "misc",
    "other",
    "stuff",
    "things",
    "topic",
    "chat",
    "conversation",
    "unknown",
    "none",
];

const CONTRADICTORY_PAIRS: [(IntentType, IntentType); 4] = [
    (IntentType::Propose, IntentType::Disagree),
    (IntentType::Agree, IntentType::Disagree),
    (IntentType::Disagree, IntentType::Agree),
    (IntentType::Confirm, IntentType::Disagree),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ObstacleMetrics {
    pub vagueness: f64,
    pub contradiction: f64,
    pub semantic_gap: f64,
    pub comprehension_barrier: f64,
    pub overall: f64,
}

impl ObstacleMetrics {
    pub const NONE: ObstacleMetrics = ObstacleMetrics {
        vagueness: 0.0,
        contradiction: 0.0,
        semantic_gap: 0.0,
        comprehension_barrier: 0.0,
        overall: 0.0,
    };
}

pub(crate) fn words(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Nesting depth of a JSON value; scalars are 0.
fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn vagueness(window: &[Arc<StoredMessage>], config: &ObstacleConfig) -> f64 {
    mean(window.iter().map(|m| {
        let hits = m
            .text()
            .map(|text| {
                words(&text)
                    .iter()
                    .filter(|w| VAGUE_WORDS.contains(&w.as_str()))
                    .count()
            })
            .unwrap_or(0);
        let lexical = (hits as f64 / config.vague_hits_saturation).min(1.0);
        let topic_penalty = match m.topic() {
            Some(topic)
                if topic.chars().count() >= config.min_topic_len
                    && !GENERIC_TOPICS.contains(&topic.to_lowercase().as_str()) =>
            {
                0.0
            }
            _ => config.topic_penalty,
        };
        (lexical + topic_penalty).min(1.0)
    }))
}

fn normalized(count: usize, window_len: usize) -> f64 {
    let half = (window_len as f64 / 2.0).max(1.0);
    (count as f64 / half).min(1.0)
}

fn contradiction(window: &[Arc<StoredMessage>], config: &ObstacleConfig) -> f64 {
    let count: usize = window
        .windows(2)
        .map(|pair| {
            let (a, b) = (&pair[0].envelope, &pair[1].envelope);
            let mut flags = 0;
            let same_topic = matches!((a.topic(), b.topic()), (Some(x), Some(y)) if x == y);
            let (ia, ib) = (a.intent_type().for_scoring(), b.intent_type().for_scoring());
            if same_topic
                && CONTRADICTORY_PAIRS
                    .iter()
                    .any(|(from, to)| ia == *from && ib == *to)
            {
                flags += 1;
            }
            if let (Some(pa), Some(pb)) = (a.pad(), b.pad())
                && (pb[0] - pa[0]).abs() > config.pleasure_swing
            {
                flags += 1;
            }
            flags
        })
        .sum();
    normalized(count, window.len())
}

fn semantic_gap(window: &[Arc<StoredMessage>]) -> f64 {
    let count: usize = window
        .windows(2)
        .map(|pair| {
            let (a, b) = (&pair[0].envelope, &pair[1].envelope);
            let mut flags = 0;
            if let (Some(ta), Some(tb)) = (a.topic(), b.topic())
                && ta != tb
                && ta.chars().count() > 3
                && tb.chars().count() > 3
            {
                let wa: HashSet<String> = words(ta).into_iter().collect();
                let wb: HashSet<String> = words(tb).into_iter().collect();
                if wa.is_disjoint(&wb) {
                    flags += 1;
                }
            }
            if a.intent_type().for_scoring() == IntentType::Ask
                && !matches!(
                    b.intent_type().for_scoring(),
                    IntentType::Tell | IntentType::Propose
                )
            {
                flags += 1;
            }
            flags
        })
        .sum();
    normalized(count, window.len())
}

fn comprehension_barrier(window: &[Arc<StoredMessage>], config: &ObstacleConfig) -> f64 {
    mean(window.iter().map(|m| {
        let word_count = m.text().map(|t| words(&t).len()).unwrap_or(0);
        let length = if word_count > config.word_limit {
            ((word_count - config.word_limit) as f64 / config.word_excess_scale).min(1.0)
        } else {
            0.0
        };
        let depth = m
            .payload
            .as_ref()
            .and_then(|p| p.json())
            .map(|v| json_depth(&v))
            .unwrap_or(0);
        let nesting = if depth > config.depth_limit {
            config.depth_weight
                * ((depth - config.depth_limit) as f64 / config.depth_excess_scale).min(1.0)
        } else {
            0.0
        };
        (length + nesting).min(1.0)
    }))
}

pub fn calculate(messages: &[Arc<StoredMessage>], config: &ObstacleConfig) -> ObstacleMetrics {
    if messages.len() < 2 {
        return ObstacleMetrics::NONE;
    }
    let window = &messages[messages.len().saturating_sub(config.window.max(2))..];

    let vagueness = vagueness(window, config).clamp(0.0, 1.0);
    let contradiction = contradiction(window, config).clamp(0.0, 1.0);
    let semantic_gap = semantic_gap(window).clamp(0.0, 1.0);
    let comprehension_barrier = comprehension_barrier(window, config).clamp(0.0, 1.0);
    let overall =
        ((vagueness + contradiction + semantic_gap + comprehension_barrier) / 4.0).clamp(0.0, 1.0);

    ObstacleMetrics {
        vagueness,
        contradiction,
        semantic_gap,
        comprehension_barrier,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Consent, Envelope, Payload};
    use chrono::Utc;
    use serde_json::json;

    fn msg(intent: &str, topic: Option<&str>, payload: Option<Payload>) -> Arc<StoredMessage> {
        let mut envelope = Envelope::new(intent, Consent::Private);
        if let Some(topic) = topic {
            envelope = envelope.with_topic(topic);
        }
        Arc::new(StoredMessage::new(envelope, payload, Utc::now()))
    }

    fn with_pad(intent: &str, topic: &str, pleasure: f64) -> Arc<StoredMessage> {
        Arc::new(StoredMessage::new(
            Envelope::new(intent, Consent::Private)
                .with_topic(topic)
                .with_pad(pleasure, 0.0, 0.0),
            None,
            Utc::now(),
        ))
    }

    #[test]
    fn single_message_has_no_obstacles() {
        let messages = vec![msg("ask", None, Some(Payload::from("maybe stuff somehow")))];
        assert_eq!(
            calculate(&messages, &ObstacleConfig::default()),
            ObstacleMetrics::NONE
        );
    }

    #[test]
    fn vague_words_and_missing_topics_raise_vagueness() {
        let config = ObstacleConfig::default();
        let vague = vec![
            msg("tell", None, Some(Payload::from("maybe some stuff, whatever"))),
            msg("tell", Some("misc"), Some(Payload::from("basically things etc"))),
        ];
        let crisp = vec![
            msg("tell", Some("deployment"), Some(Payload::from("release at noon"))),
            msg("tell", Some("deployment"), Some(Payload::from("rollback plan ready"))),
        ];
        assert_eq!(calculate(&vague, &config).vagueness, 1.0);
        assert_eq!(calculate(&crisp, &config).vagueness, 0.0);
    }

    #[test]
    fn contradictory_same_topic_intents_are_flagged() {
        let config = ObstacleConfig::default();
        let messages = vec![
            msg("propose", Some("budget"), None),
            msg("disagree", Some("budget"), None),
        ];
        assert_eq!(calculate(&messages, &config).contradiction, 1.0);

        let other_topics = vec![
            msg("propose", Some("budget"), None),
            msg("disagree", Some("venue"), None),
        ];
        assert_eq!(calculate(&other_topics, &config).contradiction, 0.0);
    }

    #[test]
    fn pleasure_swings_count_as_contradiction() {
        let config = ObstacleConfig::default();
        let messages = vec![
            with_pad("tell", "budget", 0.8),
            with_pad("tell", "budget", -0.6),
            with_pad("tell", "budget", -0.5),
            with_pad("tell", "budget", -0.5),
        ];
        // one swing over a window of four
        assert_eq!(calculate(&messages, &config).contradiction, 0.5);
    }

    #[test]
    fn unrelated_topics_and_unanswered_questions_are_gaps() {
        let config = ObstacleConfig::default();
        let messages = vec![
            msg("ask", Some("weather forecast"), None),
            msg("notify", Some("quarterly taxes"), None),
        ];
        // topic jump plus unanswered ask, over half a window of one
        assert_eq!(calculate(&messages, &config).semantic_gap, 1.0);

        let related = vec![
            msg("ask", Some("weather forecast"), None),
            msg("tell", Some("weather today"), None),
        ];
        assert_eq!(calculate(&related, &config).semantic_gap, 0.0);
    }

    #[test]
    fn long_or_deep_payloads_are_barriers() {
        let config = ObstacleConfig::default();
        let long_text = vec!["word"; 300].join(" ");
        let deep = json!({"a": {"b": {"c": {"d": {"e": {"f": {"g": {"h": 1}}}}}}}});
        let messages = vec![
            msg("tell", Some("report"), Some(Payload::from(long_text))),
            msg("tell", Some("report"), Some(Payload::Json(deep))),
        ];
        let m = calculate(&messages, &config);
        // 300 words saturates; depth 8 adds the full depth weight
        assert_eq!(m.comprehension_barrier, (1.0 + 0.5) / 2.0);
    }

    #[test]
    fn json_payload_scores_the_same_as_its_wire_bytes() {
        let config = ObstacleConfig::default();
        let body = json!({"text": "maybe something, kind of whatever", "meta": {"n": 1}});
        let decoded = Payload::Bytes(serde_json::to_vec(&body).unwrap());
        let over_http = vec![
            msg("tell", Some("plan"), Some(Payload::Json(body.clone()))),
            msg("tell", Some("plan"), Some(Payload::Json(body))),
        ];
        let over_ws = vec![
            msg("tell", Some("plan"), Some(decoded.clone())),
            msg("tell", Some("plan"), Some(decoded)),
        ];
        assert_eq!(calculate(&over_http, &config), calculate(&over_ws, &config));
        assert!(calculate(&over_ws, &config).vagueness > 0.0);
    }

    #[test]
    fn overall_is_the_mean() {
        let messages = vec![
            msg("agree", Some("plan"), Some(Payload::from("maybe"))),
            msg("disagree", Some("plan"), None),
            msg("ask", Some("lunch"), None),
        ];
        let m = calculate(&messages, &ObstacleConfig::default());
        let expected =
            (m.vagueness + m.contradiction + m.semantic_gap + m.comprehension_barrier) / 4.0;
        assert!((m.overall - expected).abs() < 1e-12);
    }

    #[test]
    fn json_depth_counts_containers() {
        assert_eq!(json_depth(&json!(1)), 0);
        assert_eq!(json_depth(&json!([1, [2]])), 2);
        assert_eq!(json_depth(&json!({"a": {"b": []}})), 3);
    }
}
