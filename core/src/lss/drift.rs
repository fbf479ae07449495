use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::DriftConfig;

use super::storage::StoredMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    CoherenceDrop,
    TopicShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DriftEvent {
    pub thread_id: String,
    #[serde(rename = "type")]
    pub kind: DriftKind,
    pub severity: DriftSeverity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

/// Compare the fresh coherence against the previous value, then look for a
/// topic shift in the trailing window. At most one event per call.
pub fn detect(
    thread_id: &str,
    previous: f64,
    current: f64,
    messages: &[Arc<StoredMessage>],
    config: &DriftConfig,
    now: DateTime<Utc>,
) -> Option<DriftEvent> {
    let drop = previous - current;
    if current < config.min_coherence && drop >= config.drop_threshold {
        let severity = if drop > 0.4 {
            DriftSeverity::High
        } else if drop > 0.25 {
            DriftSeverity::Medium
        } else {
            DriftSeverity::Low
        };
        return Some(DriftEvent {
            thread_id: thread_id.to_string(),
            kind: DriftKind::CoherenceDrop,
            severity,
            timestamp: now,
            previous: Some(previous),
            current: Some(current),
            topics: Vec::new(),
        });
    }

    let start = messages.len().saturating_sub(config.topic_shift_window);
    let topics: Vec<String> = messages[start..]
        .iter()
        .filter_map(|m| m.topic().map(str::to_string))
        .collect();
    if topics.len() >= 3 {
        let unique = topics.iter().collect::<HashSet<_>>().len();
        if unique >= topics.len().min(3) {
            let severity = if unique > 3 {
                DriftSeverity::High
            } else {
                DriftSeverity::Medium
            };
            return Some(DriftEvent {
                thread_id: thread_id.to_string(),
                kind: DriftKind::TopicShift,
                severity,
                timestamp: now,
                previous: None,
                current: None,
                topics,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lss::coherence::tests::msg;

    #[test]
    fn steep_drop_below_floor_is_high_severity() {
        let event = detect("t", 1.0, 0.45, &[], &DriftConfig::default(), Utc::now()).unwrap();
        assert_eq!(event.kind, DriftKind::CoherenceDrop);
        assert_eq!(event.severity, DriftSeverity::High);
    }

    #[test]
    fn drop_severity_scales() {
        let config = DriftConfig::default();
        let medium = detect("t", 0.8, 0.5, &[], &config, Utc::now()).unwrap();
        assert_eq!(medium.severity, DriftSeverity::Medium);
        let low = detect("t", 0.75, 0.5, &[], &config, Utc::now()).unwrap();
        assert_eq!(low.severity, DriftSeverity::Low);
    }

    #[test]
    fn small_drop_or_high_coherence_is_not_drift() {
        let config = DriftConfig::default();
        assert!(detect("t", 0.65, 0.55, &[], &config, Utc::now()).is_none());
        assert!(detect("t", 1.0, 0.7, &[], &config, Utc::now()).is_none());
    }

    #[test]
    fn three_distinct_recent_topics_is_a_shift() {
        let messages = vec![
            msg("tell", Some("weather"), None),
            msg("tell", Some("food"), None),
            msg("tell", Some("work"), None),
        ];
        let event = detect("t", 0.9, 0.9, &messages, &DriftConfig::default(), Utc::now()).unwrap();
        assert_eq!(event.kind, DriftKind::TopicShift);
        assert_eq!(event.severity, DriftSeverity::Medium);
        assert_eq!(event.topics, vec!["weather", "food", "work"]);
    }

    #[test]
    fn repeated_topics_are_not_a_shift() {
        let messages = vec![
            msg("tell", Some("weather"), None),
            msg("tell", Some("weather"), None),
            msg("tell", Some("food"), None),
        ];
        assert!(detect("t", 0.9, 0.9, &messages, &DriftConfig::default(), Utc::now()).is_none());
    }
}
