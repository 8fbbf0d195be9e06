// src/patterns/filter.rs — Domain, actionability and threshold filtering

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::PatternCandidate;
use crate::infra::config::FilterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ExcludedDomain,
    NonActionable,
    BelowMinOccurrences,
    BelowMinConfidence,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input: usize,
    pub kept: usize,
    pub excluded: BTreeMap<ExclusionReason, usize>,
}

impl FilterStats {
    pub fn excluded_for(&self, reason: ExclusionReason) -> usize {
        self.excluded.get(&reason).copied().unwrap_or(0)
    }
}

pub struct PatternFilter {
    config: FilterConfig,
    excluded: BTreeSet<String>,
    actionable: BTreeSet<String>,
}

impl PatternFilter {
    pub fn new(config: FilterConfig) -> Self {
        let excluded = config.excluded_domains.iter().cloned().collect();
        let actionable = config.actionable_domains.iter().cloned().collect();
        Self {
            config,
            excluded,
            actionable,
        }
    }

    pub fn is_actionable_domain(&self, domain: &str) -> bool {
        self.actionable.contains(domain)
    }

    /// First reason the candidate is rejected, if any. Checks run cheapest first.
    pub fn check(&self, candidate: &PatternCandidate) -> Option<ExclusionReason> {
        if candidate.domains.iter().any(|d| self.excluded.contains(d)) {
            return Some(ExclusionReason::ExcludedDomain);
        }
        if !candidate.domains.iter().any(|d| self.is_actionable_domain(d)) {
            return Some(ExclusionReason::NonActionable);
        }
        let overrides = self.config.overrides.get(candidate.pattern_type.as_str());
        let min_occurrences = overrides
            .and_then(|o| o.min_occurrences)
            .unwrap_or(self.config.min_occurrences) as usize;
        let min_confidence = overrides
            .and_then(|o| o.min_confidence)
            .unwrap_or(self.config.min_confidence);
        if candidate.occurrences() < min_occurrences {
            return Some(ExclusionReason::BelowMinOccurrences);
        }
        if candidate.raw_confidence < min_confidence {
            return Some(ExclusionReason::BelowMinConfidence);
        }
        None
    }

    pub fn apply(&self, candidates: Vec<PatternCandidate>) -> (Vec<PatternCandidate>, FilterStats) {
        let mut stats = FilterStats {
            input: candidates.len(),
            ..Default::default()
        };
        let kept: Vec<PatternCandidate> = candidates
            .into_iter()
            .filter(|c| match self.check(c) {
                Some(reason) => {
                    *stats.excluded.entry(reason).or_insert(0) += 1;
                    false
                }
                None => true,
            })
            .collect();
        stats.kept = kept.len();
        (kept, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PatternType, TimeWindow};
    use crate::infra::config::ThresholdOverride;
    use chrono::{Duration, TimeZone, Utc};

    fn candidate(kind: PatternType, domains: &[&str], occurrences: i64, conf: f64) -> PatternCandidate {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut c = PatternCandidate::new(kind, TimeWindow::new(t, t + Duration::days(30)))
            .with_occurrences((0..occurrences).map(|i| t + Duration::hours(i)))
            .with_confidence(conf);
        for (i, d) in domains.iter().enumerate() {
            c = c.with_device(&format!("dev{i}"), d);
        }
        c
    }

    #[test]
    fn test_reasons_counted() {
        let filter = PatternFilter::new(FilterConfig::default());
        let (kept, stats) = filter.apply(vec![
            candidate(PatternType::CoOccurrence, &["binary_sensor", "light"], 10, 0.9),
            candidate(PatternType::CoOccurrence, &["sensor", "light"], 10, 0.9),
            candidate(PatternType::TimeOfDay, &["binary_sensor"], 10, 0.9),
            candidate(PatternType::CoOccurrence, &["binary_sensor", "switch"], 3, 0.9),
            candidate(PatternType::Sequence, &["light", "switch"], 10, 0.2),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(stats.input, 5);
        assert_eq!(stats.excluded_for(ExclusionReason::ExcludedDomain), 1);
        assert_eq!(stats.excluded_for(ExclusionReason::NonActionable), 1);
        assert_eq!(stats.excluded_for(ExclusionReason::BelowMinOccurrences), 1);
        assert_eq!(stats.excluded_for(ExclusionReason::BelowMinConfidence), 1);
    }

    #[test]
    fn test_per_type_override() {
        let mut config = FilterConfig::default();
        config.overrides.insert(
            "anomaly".into(),
            ThresholdOverride {
                min_occurrences: Some(1),
                min_confidence: None,
            },
        );
        let filter = PatternFilter::new(config);
        assert_eq!(
            filter.check(&candidate(PatternType::Anomaly, &["light"], 2, 0.9)),
            None
        );
        assert_eq!(
            filter.check(&candidate(PatternType::Duration, &["light"], 2, 0.9)),
            Some(ExclusionReason::BelowMinOccurrences)
        );
    }
}
