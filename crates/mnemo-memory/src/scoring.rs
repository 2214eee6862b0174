//! Importance scoring for new events and composite ranking for retrieval.

use mnemo_config::schema::WeightsConfig;
use mnemo_core::{EventType, ScoreBreakdown};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::episodic::EpisodicEvent;

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;

/// Assigns an importance in `1..=10` to an incoming event.
pub trait ImportanceScorer: Send + Sync {
    fn score(&self, event: &EpisodicEvent) -> u8;
}

/// Additive heuristic over event type, content length and `context.priority`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    const BASE: i32 = 5;

    fn event_type_weight(event_type: EventType) -> i32 {
        match event_type {
            EventType::Observation => 0,
            EventType::Action => 1,
            EventType::Interaction => 2,
        }
    }

    fn priority_weight(context: &mnemo_core::Metadata) -> i32 {
        match context.get("priority").and_then(Value::as_str) {
            Some("high") => 2,
            Some("critical") => 3,
            _ => 0,
        }
    }
}

impl ImportanceScorer for HeuristicScorer {
    fn score(&self, event: &EpisodicEvent) -> u8 {
        let len = event.content.chars().count();
        let mut score = Self::BASE + Self::event_type_weight(event.event_type);
        if len > 500 {
            score += 1;
        }
        if len > 1000 {
            score += 1;
        }
        score += Self::priority_weight(&event.context);
        score.clamp(MIN_IMPORTANCE as i32, MAX_IMPORTANCE as i32) as u8
    }
}

/// Weights for the recency/importance/relevance blend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        WeightsConfig::default().into()
    }
}

impl From<WeightsConfig> for CompositeWeights {
    fn from(w: WeightsConfig) -> Self {
        Self {
            recency: w.recency,
            importance: w.importance,
            relevance: w.relevance,
        }
    }
}

impl CompositeWeights {
    /// Negative weights would break monotonicity; they are floored at zero.
    pub fn sanitized(self) -> Self {
        Self {
            recency: self.recency.max(0.0),
            importance: self.importance.max(0.0),
            relevance: self.relevance.max(0.0),
        }
    }

    pub fn score(&self, recency: f32, importance: f32, relevance: f32) -> ScoreBreakdown {
        ScoreBreakdown {
            recency,
            importance,
            relevance,
            composite: self.recency * recency
                + self.importance * importance
                + self.relevance * relevance,
        }
    }
}

/// `exp(-age / half_life)`. Future timestamps count as age zero.
pub fn recency_score(age_days: f64, half_life_days: f64) -> f32 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    (-age_days.max(0.0) / half_life_days).exp() as f32
}

pub fn importance_score(importance: u8) -> f32 {
    f32::from(importance.min(MAX_IMPORTANCE)) / f32::from(MAX_IMPORTANCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::Metadata;
    use serde_json::json;
    use uuid::Uuid;

    fn event(event_type: EventType, len: usize, priority: Option<&str>) -> EpisodicEvent {
        let mut context = Metadata::new();
        if let Some(p) = priority {
            context.insert("priority".into(), json!(p));
        }
        EpisodicEvent {
            agent_id: Uuid::new_v4(),
            content: "x".repeat(len),
            event_type,
            context,
            timestamp: None,
        }
    }

    #[test]
    fn test_heuristic_base_and_type() {
        let s = HeuristicScorer;
        assert_eq!(s.score(&event(EventType::Observation, 10, None)), 5);
        assert_eq!(s.score(&event(EventType::Action, 10, None)), 6);
        assert_eq!(s.score(&event(EventType::Interaction, 10, None)), 7);
    }

    #[test]
    fn test_heuristic_length_and_priority_clamped() {
        let s = HeuristicScorer;
        assert_eq!(s.score(&event(EventType::Observation, 600, None)), 6);
        assert_eq!(s.score(&event(EventType::Observation, 1200, Some("high"))), 9);
        assert_eq!(s.score(&event(EventType::Interaction, 1200, Some("critical"))), 10);
        assert_eq!(s.score(&event(EventType::Observation, 10, Some("low"))), 5);
    }

    #[test]
    fn test_recency_decay() {
        assert!((recency_score(0.0, 30.0) - 1.0).abs() < 1e-6);
        assert!((recency_score(30.0, 30.0) - (-1.0f64).exp() as f32).abs() < 1e-6);
        assert_eq!(recency_score(-5.0, 30.0), 1.0);
        assert!(recency_score(10.0, 30.0) > recency_score(20.0, 30.0));
    }

    #[test]
    fn test_composite_monotonic() {
        let w = CompositeWeights::default();
        let base = w.score(0.5, 0.5, 0.5).composite;
        assert!(w.score(0.6, 0.5, 0.5).composite >= base);
        assert!(w.score(0.5, 0.6, 0.5).composite >= base);
        assert!(w.score(0.5, 0.5, 0.6).composite >= base);
    }

    #[test]
    fn test_sanitized_floors_negative_weights() {
        let w = CompositeWeights { recency: -1.0, importance: 0.5, relevance: 0.5 }.sanitized();
        assert_eq!(w.recency, 0.0);
    }
}
