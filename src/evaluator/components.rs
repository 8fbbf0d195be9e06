// src/evaluator/components.rs — Per-candidate quality sub-scores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::weights::ComponentWeights;
use crate::core::types::{PatternCandidate, PatternType};
use crate::infra::config::QualityConfig;
use crate::patterns::activity::coefficient_of_variation;

/// Domains that report state without being commanded.
const TRIGGER_DOMAINS: &[&str] = &[
    "binary_sensor",
    "sensor",
    "person",
    "device_tracker",
    "sun",
    "weather",
    "input_select",
    "event",
];

/// Five normalized sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub actionability: f64,
    pub consistency: f64,
    pub frequency: f64,
    pub recency: f64,
    pub automation_potential: f64,
}

impl ComponentScores {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.actionability,
            self.consistency,
            self.frequency,
            self.recency,
            self.automation_potential,
        ]
    }

    /// Σ weight × component, clamped to [0, 1].
    pub fn weighted(&self, weights: &ComponentWeights) -> f64 {
        self.as_array()
            .iter()
            .zip(weights.as_array())
            .map(|(c, w)| c * w)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}

/// How readily a pattern kind turns into a useful automation.
pub fn automation_prior(pattern_type: PatternType) -> f64 {
    match pattern_type {
        PatternType::TimeOfDay => 1.0,
        PatternType::Sequence => 0.85,
        PatternType::CoOccurrence => 0.8,
        PatternType::Contextual => 0.75,
        PatternType::RoomBased => 0.7,
        PatternType::Duration => 0.7,
        PatternType::Session => 0.6,
        PatternType::DayType => 0.5,
        PatternType::Seasonal => 0.4,
        PatternType::Anomaly => 0.2,
    }
}

pub struct ComponentScorer {
    actionable: BTreeSet<String>,
    half_life_days: f64,
    target_per_day: f64,
}

impl ComponentScorer {
    pub fn new(config: &QualityConfig, actionable_domains: &[String]) -> Self {
        Self {
            actionable: actionable_domains.iter().cloned().collect(),
            half_life_days: config.recency_half_life_days.max(f64::EPSILON),
            target_per_day: config.frequency_target_per_day.max(f64::EPSILON),
        }
    }

    pub fn score(&self, candidate: &PatternCandidate, as_of: DateTime<Utc>) -> ComponentScores {
        let has_actionable = candidate.domains.iter().any(|d| self.actionable.contains(d));
        let has_trigger = candidate
            .domains
            .iter()
            .any(|d| TRIGGER_DOMAINS.contains(&d.as_str()));

        let actionability = match (has_actionable, has_trigger) {
            (false, _) => 0.0,
            (true, true) => 1.0,
            (true, false) => 0.8,
        };

        let mut automation_potential = automation_prior(candidate.pattern_type);
        if candidate.pattern_type == PatternType::CoOccurrence && !has_actionable {
            automation_potential = 0.3;
        }

        ComponentScores {
            actionability,
            consistency: consistency(candidate),
            frequency: self.frequency(candidate),
            recency: self.recency(candidate, as_of),
            automation_potential,
        }
    }

    fn frequency(&self, candidate: &PatternCandidate) -> f64 {
        let days = candidate.window.days().max(1.0);
        (candidate.occurrences() as f64 / days / self.target_per_day).min(1.0)
    }

    fn recency(&self, candidate: &PatternCandidate, as_of: DateTime<Utc>) -> f64 {
        let Some(last) = candidate.last_occurrence() else {
            return 0.0;
        };
        let age_days = ((as_of - last).num_seconds() as f64 / 86_400.0).max(0.0);
        (-std::f64::consts::LN_2 * age_days / self.half_life_days).exp()
    }
}

/// Regularity of inter-occurrence gaps: 1 / (1 + cv). Too few points is neutral.
fn consistency(candidate: &PatternCandidate) -> f64 {
    if candidate.occurrences() < 3 {
        return 0.5;
    }
    let times: Vec<&DateTime<Utc>> = candidate.occurrence_times.iter().collect();
    let gaps: Vec<f64> = times
        .windows(2)
        .map(|w| (*w[1] - *w[0]).num_seconds() as f64)
        .collect();
    match coefficient_of_variation(&gaps) {
        Some(cv) => 1.0 / (1.0 + cv),
        None => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TimeWindow;
    use chrono::{Duration, TimeZone};

    fn scorer() -> ComponentScorer {
        let filter = crate::infra::config::FilterConfig::default();
        ComponentScorer::new(&QualityConfig::default(), &filter.actionable_domains)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_regular_recent_pair_scores_high() {
        let c = PatternCandidate::new(PatternType::CoOccurrence, TimeWindow::trailing(t0() + Duration::days(30), 30))
            .with_device("m", "binary_sensor")
            .with_device("l", "light")
            .with_occurrences((0..30).map(|d| t0() + Duration::days(d) + Duration::hours(7)));
        let s = scorer().score(&c, t0() + Duration::days(30));
        assert_eq!(s.actionability, 1.0);
        assert!(s.consistency > 0.99);
        assert!((s.frequency - 1.0).abs() < 1e-9);
        assert!(s.recency > 0.9);
        assert!((s.automation_potential - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_recency_halves_each_half_life() {
        let c = PatternCandidate::new(PatternType::TimeOfDay, TimeWindow::trailing(t0(), 30))
            .with_device("l", "light")
            .with_occurrences([t0()]);
        let s = scorer().score(&c, t0() + Duration::days(7));
        assert!((s.recency - 0.5).abs() < 1e-6);
        assert_eq!(s.consistency, 0.5);
        assert_eq!(s.actionability, 0.8);
    }

    #[test]
    fn test_passive_pair_has_low_potential() {
        let c = PatternCandidate::new(PatternType::CoOccurrence, TimeWindow::trailing(t0(), 30))
            .with_device("a", "binary_sensor")
            .with_device("b", "binary_sensor");
        let s = scorer().score(&c, t0());
        assert_eq!(s.actionability, 0.0);
        assert!((s.automation_potential - 0.3).abs() < 1e-9);
        assert_eq!(s.recency, 0.0);
    }

    #[test]
    fn test_weighted_composite() {
        let s = ComponentScores {
            actionability: 1.0,
            consistency: 1.0,
            frequency: 1.0,
            recency: 1.0,
            automation_potential: 1.0,
        };
        assert!((s.weighted(&ComponentWeights::default()) - 1.0).abs() < 1e-9);
    }
}
