//! Interaction quality beyond raw coherence: presence, clarity, distraction
//! and engagement.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::AwarenessConfig;
use crate::envelope::IntentType;

use super::coherence::{CoherenceResult, intent_similarity, mean_pad_variance, unique_topics, variance};
use super::storage::StoredMessage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AwarenessMetrics {
    pub presence: f64,
    pub clarity: f64,
    pub distraction: f64,
    pub engagement: f64,
    pub overall: f64,
}

impl AwarenessMetrics {
    pub const NEUTRAL: AwarenessMetrics = AwarenessMetrics {
        presence: 1.0,
        clarity: 1.0,
        distraction: 0.0,
        engagement: 1.0,
        overall: 1.0,
    };
}

const RESPONSE_PATTERNS: [(IntentType, IntentType); 3] = [
    (IntentType::Ask, IntentType::Tell),
    (IntentType::Propose, IntentType::Confirm),
    (IntentType::Tell, IntentType::Ask),
];

fn tail(messages: &[Arc<StoredMessage>], n: usize) -> &[Arc<StoredMessage>] {
    &messages[messages.len().saturating_sub(n)..]
}

fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_milliseconds() as f64 / 60_000.0).max(0.0)
}

fn presence(messages: &[Arc<StoredMessage>], now: DateTime<Utc>, config: &AwarenessConfig) -> f64 {
    let Some(last) = messages.last() else {
        return 1.0;
    };
    let age_minutes = minutes_between(last.received_at, now);
    let recency = (-age_minutes / config.recency_decay_minutes).exp();

    let window = tail(messages, config.engagement_window);
    let intervals: Vec<f64> = window
        .windows(2)
        .map(|pair| {
            ((pair[1].received_at - pair[0].received_at).num_milliseconds() as f64 / 1000.0)
                .max(0.0)
        })
        .collect();
    let consistency = if intervals.is_empty() {
        1.0
    } else {
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        (-variance(&intervals) / (mean * mean + 1.0)).exp()
    };

    (0.5 * recency + 0.5 * consistency).clamp(0.0, 1.0)
}

fn clarity(coherence: &CoherenceResult, config: &AwarenessConfig) -> f64 {
    (config.clarity_semantic_weight * coherence.semantic_alignment
        + config.clarity_intent_weight * coherence.intent_similarity
        + config.clarity_affect_weight * coherence.affect_stability)
        .clamp(0.0, 1.0)
}

fn distraction(messages: &[Arc<StoredMessage>], config: &AwarenessConfig) -> f64 {
    let window = tail(messages, config.distraction_window);
    if window.len() < 2 {
        return 0.0;
    }
    let (_, unique) = unique_topics(window);
    let jumps = unique.saturating_sub(1).min(config.max_topic_jumps);
    let topic_score = if config.max_topic_jumps == 0 {
        0.0
    } else {
        jumps as f64 / config.max_topic_jumps as f64
    };
    let intent_score = 1.0 - intent_similarity(window);
    let affect_score = mean_pad_variance(window)
        .map(|v| (v / config.affect_variance_cap).min(1.0))
        .unwrap_or(0.0);

    ((topic_score + intent_score + affect_score) / 3.0).clamp(0.0, 1.0)
}

fn engagement(messages: &[Arc<StoredMessage>], config: &AwarenessConfig) -> f64 {
    let window = tail(messages, config.engagement_window);
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return 1.0;
    };
    if window.len() < 2 {
        return 1.0;
    }

    let span_minutes = minutes_between(first.received_at, last.received_at);
    let rate_score = if span_minutes <= 0.0 {
        1.0
    } else {
        (window.len() as f64 / span_minutes / config.max_rate_per_minute).min(1.0)
    };

    let intents: Vec<IntentType> = window
        .iter()
        .map(|m| m.envelope.intent_type().for_scoring())
        .collect();
    let distinct: HashSet<&IntentType> = intents.iter().collect();
    let diversity_score = if config.max_intent_diversity == 0 {
        1.0
    } else {
        distinct.len().min(config.max_intent_diversity) as f64 / config.max_intent_diversity as f64
    };

    let responses = intents
        .windows(2)
        .filter(|pair| {
            RESPONSE_PATTERNS
                .iter()
                .any(|(from, to)| pair[0] == *from && pair[1] == *to)
        })
        .count();
    let response_score = responses as f64 / (window.len() - 1) as f64;

    ((rate_score + diversity_score + response_score) / 3.0).clamp(0.0, 1.0)
}

pub fn calculate(
    messages: &[Arc<StoredMessage>],
    coherence: &CoherenceResult,
    now: DateTime<Utc>,
    config: &AwarenessConfig,
) -> AwarenessMetrics {
    if messages.len() < 2 {
        return AwarenessMetrics::NEUTRAL;
    }
    let presence = presence(messages, now, config);
    let clarity = clarity(coherence, config);
    let distraction = distraction(messages, config);
    let engagement = engagement(messages, config);
    let overall = ((presence + clarity + engagement) / 3.0 * (1.0 - distraction)).clamp(0.0, 1.0);

    AwarenessMetrics {
        presence,
        clarity,
        distraction,
        engagement,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lss::coherence::{self, tests::msg_at};
    use chrono::TimeDelta;

    fn conversation(now: DateTime<Utc>, spec: &[(&str, &str)]) -> Vec<Arc<StoredMessage>> {
        spec.iter()
            .enumerate()
            .map(|(i, (intent, topic))| {
                msg_at(
                    intent,
                    Some(topic),
                    Some([0.3, 0.2, 0.1]),
                    now - TimeDelta::seconds(30 * (spec.len() - i) as i64),
                )
            })
            .collect()
    }

    #[test]
    fn single_message_is_neutral() {
        let now = Utc::now();
        let messages = conversation(now, &[("ask", "weather")]);
        let c = coherence::calculate(&messages, 10);
        assert_eq!(
            calculate(&messages, &c, now, &AwarenessConfig::default()),
            AwarenessMetrics::NEUTRAL
        );
    }

    #[test]
    fn two_messages_are_scored_with_single_interval_defaults() {
        let now = Utc::now();
        let pad = Some([0.3, 0.2, 0.1]);
        let messages = vec![
            msg_at("ask", Some("weather"), pad, now - TimeDelta::seconds(30)),
            msg_at("tell", Some("weather"), pad, now),
        ];
        let c = coherence::calculate(&messages, 10);
        let m = calculate(&messages, &c, now, &AwarenessConfig::default());
        assert_ne!(m, AwarenessMetrics::NEUTRAL);
        // one interval has no spread; recency is full at age zero
        assert_eq!(m.presence, 1.0);
        // rate saturates, two of four intent types, the one pair is ask → tell
        assert_eq!(m.engagement, (1.0 + 0.5 + 1.0) / 3.0);

        let one = &messages[1..];
        assert_eq!(
            calculate(one, &coherence::calculate(one, 10), now, &AwarenessConfig::default()),
            AwarenessMetrics::NEUTRAL
        );
    }

    #[test]
    fn steady_focused_dialogue_is_aware() {
        let now = Utc::now();
        let messages = conversation(
            now,
            &[("ask", "weather"), ("tell", "weather"), ("ask", "weather"), ("tell", "weather")],
        );
        let c = coherence::calculate(&messages, 10);
        let m = calculate(&messages, &c, now, &AwarenessConfig::default());
        // evenly spaced: consistency term is exactly 1
        assert!(m.presence > 0.9, "presence {}", m.presence);
        assert_eq!(m.engagement, (1.0 + 0.5 + 1.0) / 3.0);
        assert!(m.distraction < 0.1, "distraction {}", m.distraction);
        let expected = (m.presence + m.clarity + m.engagement) / 3.0 * (1.0 - m.distraction);
        assert!((m.overall - expected).abs() < 1e-12);
    }

    #[test]
    fn scattered_topics_raise_distraction() {
        let now = Utc::now();
        let focused = conversation(now, &[("tell", "a"), ("tell", "a"), ("tell", "a")]);
        let scattered = conversation(now, &[("ask", "a"), ("plan", "b"), ("notify", "c")]);
        let config = AwarenessConfig::default();
        let f = calculate(&focused, &coherence::calculate(&focused, 10), now, &config);
        let s = calculate(&scattered, &coherence::calculate(&scattered, 10), now, &config);
        assert!(s.distraction > f.distraction);
        assert!(s.overall < f.overall);
    }

    #[test]
    fn stale_sessions_lose_presence() {
        let now = Utc::now();
        let messages = conversation(now - TimeDelta::hours(2), &[("ask", "x"), ("tell", "x")]);
        let c = coherence::calculate(&messages, 10);
        let m = calculate(&messages, &c, now, &AwarenessConfig::default());
        assert!(m.presence < 0.51, "presence {}", m.presence);
    }

    #[test]
    fn all_outputs_stay_in_unit_range() {
        let now = Utc::now();
        let messages = vec![
            msg_at("ask", None, Some([1.0, 1.0, 1.0]), now - TimeDelta::hours(5)),
            msg_at("disagree", Some("q"), Some([-1.0, -1.0, -1.0]), now - TimeDelta::seconds(1)),
            msg_at("weird", Some("z"), None, now),
        ];
        let c = coherence::calculate(&messages, 10);
        let m = calculate(&messages, &c, now, &AwarenessConfig::default());
        for v in [m.presence, m.clarity, m.distraction, m.engagement, m.overall] {
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
