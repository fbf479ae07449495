use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::envelope::IntentType;

use super::storage::StoredMessage;

const INTENT_WEIGHT: f64 = 0.4;
const AFFECT_WEIGHT: f64 = 0.3;
const SEMANTIC_WEIGHT: f64 = 0.3;
const AFFECT_DECAY: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CoherenceResult {
    pub overall: f64,
    pub intent_similarity: f64,
    pub affect_stability: f64,
    pub semantic_alignment: f64,
}

impl CoherenceResult {
    /// Vacuous coherence of a window with fewer than two messages.
    pub const NEUTRAL: CoherenceResult = CoherenceResult {
        overall: 1.0,
        intent_similarity: 1.0,
        affect_stability: 1.0,
        semantic_alignment: 1.0,
    };

    pub fn from_components(
        intent_similarity: f64,
        affect_stability: f64,
        semantic_alignment: f64,
    ) -> Self {
        let overall = INTENT_WEIGHT * intent_similarity
            + AFFECT_WEIGHT * affect_stability
            + SEMANTIC_WEIGHT * semantic_alignment;
        Self {
            overall: overall.clamp(0.0, 1.0),
            intent_similarity,
            affect_stability,
            semantic_alignment,
        }
    }
}

/// Semantic vector for an intent. Complementary pairs (ask/tell,
/// propose/confirm) point in similar directions.
pub fn intent_vector(intent: &IntentType) -> [f64; 6] {
    match intent.for_scoring() {
        IntentType::Ask => [1.0, 0.5, 0.0, 0.0, 0.0, 0.2],
        IntentType::Propose => [0.1, 0.1, 1.0, 0.6, 0.0, 0.3],
        IntentType::Confirm => [0.0, 0.0, 0.6, 1.0, 0.0, 0.1],
        IntentType::Notify => [0.0, 0.4, 0.0, 0.0, 1.0, 0.0],
        IntentType::Sync => [0.2, 0.4, 0.1, 0.0, 0.8, 0.3],
        IntentType::Plan => [0.3, 0.3, 0.5, 0.3, 0.0, 1.0],
        IntentType::Agree => [0.0, 0.1, 0.6, 0.9, 0.0, 0.1],
        IntentType::Disagree => [0.2, 0.2, 0.4, 0.7, 0.0, 0.2],
        IntentType::Reflect => [0.4, 0.6, 0.1, 0.0, 0.0, 0.8],
        IntentType::Tell | IntentType::Other(_) => [0.5, 1.0, 0.0, 0.0, 0.1, 0.2],
    }
}

pub(crate) fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Population variance; 0 for an empty slice.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Mean over the three PAD dimensions of their variance. `None` with fewer
/// than two PAD readings.
pub(crate) fn mean_pad_variance(window: &[Arc<StoredMessage>]) -> Option<f64> {
    let pads: Vec<[f64; 3]> = window.iter().filter_map(|m| m.envelope.pad()).collect();
    if pads.len() < 2 {
        return None;
    }
    let total: f64 = (0..3)
        .map(|dim| variance(&pads.iter().map(|p| p[dim]).collect::<Vec<_>>()))
        .sum();
    Some(total / 3.0)
}

pub(crate) fn unique_topics(window: &[Arc<StoredMessage>]) -> (usize, usize) {
    let topics: Vec<&str> = window.iter().filter_map(|m| m.topic()).collect();
    let unique: HashSet<&str> = topics.iter().copied().collect();
    (topics.len(), unique.len())
}

/// Mean cosine similarity of adjacent intent vectors.
pub fn intent_similarity(window: &[Arc<StoredMessage>]) -> f64 {
    if window.len() < 2 {
        return 1.0;
    }
    let vectors: Vec<[f64; 6]> = window
        .iter()
        .map(|m| intent_vector(m.envelope.intent_type()))
        .collect();
    let sims: Vec<f64> = vectors
        .windows(2)
        .map(|pair| cosine_similarity(&pair[0], &pair[1]))
        .collect();
    sims.iter().sum::<f64>() / sims.len() as f64
}

pub fn affect_stability(window: &[Arc<StoredMessage>]) -> f64 {
    match mean_pad_variance(window) {
        Some(mean_variance) => (-AFFECT_DECAY * mean_variance).exp(),
        None => 1.0,
    }
}

pub fn semantic_alignment(window: &[Arc<StoredMessage>]) -> f64 {
    let (present, unique) = unique_topics(window);
    if present < 2 {
        return 1.0;
    }
    1.0 / unique as f64
}

/// Coherence of the trailing window of `messages`.
pub fn calculate(messages: &[Arc<StoredMessage>], window: usize) -> CoherenceResult {
    if messages.len() < 2 {
        return CoherenceResult::NEUTRAL;
    }
    let start = messages.len().saturating_sub(window.max(2));
    let window = &messages[start..];
    CoherenceResult::from_components(
        intent_similarity(window),
        affect_stability(window),
        semantic_alignment(window),
    )
}
