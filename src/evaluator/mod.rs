// src/evaluator/mod.rs — Multi-model quality ensemble

pub mod calibration;
pub mod components;
pub mod drift;
pub mod weights;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::types::{PatternCandidate, PatternType};
use crate::infra::config::QualityConfig;
use components::{ComponentScorer, ComponentScores};
use weights::{project_simplex, ComponentWeights, EnsembleWeights, ModelWeights};

/// Composite produced by each first-level model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelScores {
    pub base: f64,
    pub calibrated: f64,
    pub rl: f64,
}

impl ModelScores {
    pub fn as_array(&self) -> [f64; 3] {
        [self.base, self.calibrated, self.rl]
    }
}

/// The weights a score was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsSnapshot {
    pub version: u64,
    pub components: ComponentWeights,
    pub models: ModelWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub target_id: String,
    pub pattern_type: PatternType,
    pub components: ComponentScores,
    pub model_scores: ModelScores,
    pub weights: WeightsSnapshot,
    pub composite: f64,
}

/// Outcome of threshold + top-N selection.
#[derive(Debug, Default)]
pub struct Selection {
    /// At most `top_n` candidates, best first.
    pub selected: Vec<(PatternCandidate, QualityScore)>,
    /// Already-persisted candidates that cleared the threshold but ranked
    /// past `top_n`. Their stats are refreshed; they are not suggested.
    pub refreshed: Vec<(PatternCandidate, QualityScore)>,
    pub below_threshold: usize,
    pub beyond_top_n: usize,
}

impl Selection {
    pub fn above_threshold(&self) -> usize {
        self.selected.len() + self.beyond_top_n
    }
}

pub struct QualityEnsemble {
    config: QualityConfig,
    scorer: ComponentScorer,
}

impl QualityEnsemble {
    /// The base model's weights are fixed, so they are put on the simplex once here.
    pub fn new(mut config: QualityConfig, actionable_domains: &[String]) -> Self {
        config.base_weights =
            ComponentWeights::from_array(project_simplex(config.base_weights.as_array(), 0.0));
        let scorer = ComponentScorer::new(&config, actionable_domains);
        Self { config, scorer }
    }

    pub fn threshold(&self) -> f64 {
        self.config.persistence_threshold
    }

    pub fn score(
        &self,
        candidate: &PatternCandidate,
        weights: &EnsembleWeights,
        as_of: DateTime<Utc>,
    ) -> QualityScore {
        let components = self.scorer.score(candidate, as_of);
        let base = components.weighted(&self.config.base_weights);
        let calibrated = components.weighted(&weights.components);
        let blend = self.config.rl_blend.clamp(0.0, 1.0);
        let rl = ((1.0 - blend) * calibrated + blend * weights.rl_value(candidate.pattern_type))
            .clamp(0.0, 1.0);
        let model_scores = ModelScores {
            base,
            calibrated,
            rl,
        };
        let composite = model_scores
            .as_array()
            .iter()
            .zip(weights.models.as_array())
            .map(|(s, w)| s * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        QualityScore {
            target_id: candidate.target_id(),
            pattern_type: candidate.pattern_type,
            components,
            model_scores,
            weights: WeightsSnapshot {
                version: weights.version,
                components: weights.components,
                models: weights.models,
            },
            composite,
        }
    }

    /// Score, drop everything under the persistence threshold, and keep the
    /// best `top_n` overall. Persisted ids in `known` take rank slots like any
    /// other; past `top_n` they land in `refreshed` instead of being dropped.
    pub fn select(
        &self,
        candidates: Vec<PatternCandidate>,
        weights: &EnsembleWeights,
        as_of: DateTime<Utc>,
        top_n: usize,
        known: &BTreeSet<String>,
    ) -> Selection {
        let mut scored: Vec<(PatternCandidate, QualityScore)> = candidates
            .into_iter()
            .map(|c| {
                let score = self.score(&c, weights, as_of);
                (c, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.composite
                .total_cmp(&a.1.composite)
                .then_with(|| a.1.target_id.cmp(&b.1.target_id))
        });

        let mut selection = Selection::default();
        for (candidate, score) in scored {
            if score.composite < self.config.persistence_threshold {
                selection.below_threshold += 1;
            } else if selection.selected.len() < top_n {
                selection.selected.push((candidate, score));
            } else {
                selection.beyond_top_n += 1;
                if known.contains(&score.target_id) {
                    selection.refreshed.push((candidate, score));
                }
            }
        }
        selection
    }
}
