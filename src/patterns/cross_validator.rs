// src/patterns/cross_validator.rs — Confidence bonus for independently corroborated findings

use serde_json::Value;

use crate::core::types::PatternCandidate;
use crate::infra::config::CrossValidationConfig;

pub struct CrossValidator {
    bonus: f64,
    min_detectors: usize,
}

impl CrossValidator {
    pub fn new(config: &CrossValidationConfig) -> Self {
        Self {
            bonus: config.bonus,
            min_detectors: config.min_detectors.max(2),
        }
    }

    /// Boost every candidate seen by enough distinct detector types.
    /// Returns how many were boosted.
    pub fn apply(&self, candidates: &mut [PatternCandidate]) -> usize {
        let mut boosted = 0;
        for candidate in candidates.iter_mut() {
            if candidate.corroborated_by.len() < self.min_detectors {
                continue;
            }
            candidate.raw_confidence = (candidate.raw_confidence * self.bonus).min(1.0);
            let sources: Vec<Value> = candidate
                .corroborated_by
                .iter()
                .map(|t| Value::from(t.as_str()))
                .collect();
            candidate
                .metadata
                .insert("corroborated_by".into(), Value::Array(sources));
            boosted += 1;
        }
        boosted
    }
}
