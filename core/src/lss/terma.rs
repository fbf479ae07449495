//! Deferred content released once a predicate over session state holds.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::envelope::IntentType;

use super::obstacles::words;

pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TermaType {
    Insight,
    Pattern,
    Warning,
    Breakthrough,
}

/// All present conditions must hold; absent ones are satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RevealConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_delay_ms: Option<u64>,
    /// Minimum word-overlap similarity with the hidden topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_match: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_match: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awareness_threshold: Option<f64>,
    /// Maximum tolerated obstacle level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstacles_threshold: Option<f64>,
}

/// Session state a terma is hidden in, or evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub intent: Option<IntentType>,
    pub coherence: f64,
    pub awareness: f64,
    pub obstacles: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Terma {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TermaType,
    pub content: String,
    pub hidden_at: DateTime<Utc>,
    pub hidden_context: SessionContext,
    pub reveal_conditions: RevealConditions,
    pub priority: u8,
    pub revealed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<DateTime<Utc>>,
}

impl Terma {
    pub fn new(
        kind: TermaType,
        content: impl Into<String>,
        hidden_context: SessionContext,
        reveal_conditions: RevealConditions,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            content: content.into(),
            hidden_at: now,
            hidden_context,
            reveal_conditions,
            priority: priority.min(MAX_PRIORITY),
            revealed: false,
            revealed_at: None,
        }
    }

    /// Whether every present condition holds for `current` at `now`.
    /// Revealed termas never match again.
    pub fn is_ready(&self, current: &SessionContext, now: DateTime<Utc>) -> bool {
        if self.revealed {
            return false;
        }
        let c = &self.reveal_conditions;

        if let Some(delay_ms) = c.time_delay_ms {
            let delay = TimeDelta::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX));
            if now - self.hidden_at < delay {
                return false;
            }
        }
        if let Some(min_similarity) = c.topic_match {
            let similarity = match (&self.hidden_context.topic, &current.topic) {
                (Some(hidden), Some(now_topic)) => topic_similarity(hidden, now_topic),
                _ => 0.0,
            };
            if similarity < min_similarity {
                return false;
            }
        }
        if let Some(intents) = &c.intent_match {
            let matched = current
                .intent
                .as_ref()
                .is_some_and(|intent| intents.iter().any(|i| i == intent.as_str()));
            if !matched {
                return false;
            }
        }
        if c.coherence_threshold.is_some_and(|t| current.coherence < t) {
            return false;
        }
        if c.awareness_threshold.is_some_and(|t| current.awareness < t) {
            return false;
        }
        if c.obstacles_threshold.is_some_and(|t| current.obstacles > t) {
            return false;
        }
        true
    }

    pub(crate) fn mark_revealed(&mut self, now: DateTime<Utc>) {
        self.revealed = true;
        self.revealed_at = Some(now);
    }
}

/// Jaccard overlap of the lowercase word sets of two topics.
pub fn topic_similarity(a: &str, b: &str) -> f64 {
    let wa: HashSet<String> = words(a).into_iter().collect();
    let wb: HashSet<String> = words(b).into_iter().collect();
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}

/// Reveal every ready terma in place and return copies, highest priority first.
pub fn reveal_ready(
    termas: &mut [Terma],
    current: &SessionContext,
    now: DateTime<Utc>,
) -> Vec<Terma> {
    let mut revealed: Vec<Terma> = termas
        .iter_mut()
        .filter(|t| t.is_ready(current, now))
        .map(|t| {
            t.mark_revealed(now);
            t.clone()
        })
        .collect();
    revealed.sort_by(|a, b| b.priority.cmp(&a.priority));
    revealed
}
