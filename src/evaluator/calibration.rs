// src/evaluator/calibration.rs — Online weight calibration from user feedback

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info};

use super::weights::{project_simplex, ComponentWeights, EnsembleWeights, ModelWeights, WeightStore};
use super::QualityScore;
use crate::core::types::{Feedback, PatternType};
use crate::infra::config::CalibrationConfig;
use crate::infra::errors::EngineError;

/// A feedback event joined to the score its target was shown with.
#[derive(Debug, Clone)]
struct Sample {
    score: QualityScore,
    reward: f64,
}

impl Sample {
    fn label(&self) -> f64 {
        if self.reward > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct CalibrationState {
    scored: BTreeMap<String, QualityScore>,
    samples: VecDeque<Sample>,
    pending_rewards: Vec<(PatternType, f64)>,
}

/// Acceptance statistics for one quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub total: usize,
    pub accepted: usize,
    pub acceptance_rate: f64,
}

impl TierStats {
    fn add(&mut self, accepted: bool) {
        self.total += 1;
        if accepted {
            self.accepted += 1;
        }
        self.acceptance_rate = self.accepted as f64 / self.total as f64;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierReport {
    pub high: TierStats,
    pub medium: TierStats,
    pub low: TierStats,
}

/// Learns ensemble weights from accept/reject feedback.
///
/// Feedback may arrive at any time, including mid-run; it only touches the
/// sample buffer. New weights are published to the shared `WeightStore`, so
/// they take effect at the next run's snapshot.
pub struct CalibrationLoop {
    config: CalibrationConfig,
    store: WeightStore,
    state: Mutex<CalibrationState>,
}

impl CalibrationLoop {
    pub fn new(config: CalibrationConfig, store: WeightStore) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(CalibrationState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CalibrationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn weights(&self) -> &WeightStore {
        &self.store
    }

    /// Remember the scores a run produced so later feedback can be joined to them.
    pub fn observe_scores<'a>(&self, scores: impl IntoIterator<Item = &'a QualityScore>) {
        let mut state = self.state();
        for score in scores {
            state.scored.insert(score.target_id.clone(), score.clone());
        }
    }

    /// Record one feedback event. Returns false when the target was never
    /// scored, in which case the event cannot inform calibration.
    pub fn record_feedback(&self, feedback: &Feedback) -> bool {
        let mut state = self.state();
        let Some(score) = state.scored.get(&feedback.target_id).cloned() else {
            debug!(target_id = %feedback.target_id, "Feedback for unscored target, not used for calibration");
            return false;
        };
        state
            .pending_rewards
            .push((score.pattern_type, feedback.reward));
        state.samples.push_back(Sample {
            score,
            reward: feedback.reward,
        });
        while state.samples.len() > self.config.max_samples.max(1) {
            state.samples.pop_front();
        }
        true
    }

    /// Rebuild the sample buffer from stored history. Restored rewards are
    /// already reflected in the persisted RL values, so they are not replayed.
    pub fn restore(&self, scores: &[QualityScore], feedback: &[Feedback]) -> usize {
        self.observe_scores(scores);
        let mut state = self.state();
        let mut restored = 0;
        for fb in feedback {
            let Some(score) = state.scored.get(&fb.target_id).cloned() else {
                continue;
            };
            state.samples.push_back(Sample {
                score,
                reward: fb.reward,
            });
            restored += 1;
        }
        while state.samples.len() > self.config.max_samples.max(1) {
            state.samples.pop_front();
        }
        restored
    }

    pub fn sample_count(&self) -> usize {
        self.state().samples.len()
    }

    /// Acceptance rate bucketed by the composite the target was shown with.
    pub fn tier_report(&self) -> TierReport {
        let state = self.state();
        let mut report = TierReport::default();
        for sample in &state.samples {
            let accepted = sample.label() > 0.5;
            let composite = sample.score.composite;
            if composite >= self.config.high_tier {
                report.high.add(accepted);
            } else if composite >= self.config.medium_tier {
                report.medium.add(accepted);
            } else {
                report.low.add(accepted);
            }
        }
        report
    }

    /// Compute and publish new weights. Below the sample minimum this is a
    /// no-op that reports `CalibrationDataInsufficient`.
    pub fn recalibrate(&self) -> Result<EnsembleWeights, EngineError> {
        let mut state = self.state();
        let samples = state.samples.len();
        if samples < self.config.min_samples {
            debug!(
                samples,
                required = self.config.min_samples,
                "Not enough feedback to recalibrate"
            );
            return Err(EngineError::CalibrationDataInsufficient {
                samples,
                required: self.config.min_samples,
            });
        }

        let current = self.store.snapshot();
        let samples: Vec<&Sample> = state.samples.iter().collect();
        let labels: Vec<f64> = samples.iter().map(|s| s.label()).collect();

        let components = self.step_components(&current.components, &samples, &labels);
        let models = self.step_models(&current.models, &samples, &labels);

        let mut rl_values = current.rl_values.clone();
        let alpha = self.config.rl_learning_rate.clamp(0.0, 1.0);
        for (pattern_type, reward) in state.pending_rewards.drain(..) {
            let target = ((reward + 1.0) / 2.0).clamp(0.0, 1.0);
            let q = rl_values.entry(pattern_type).or_insert(0.5);
            *q += alpha * (target - *q);
        }

        let next = EnsembleWeights {
            version: current.version + 1,
            components,
            models,
            rl_values,
            last_updated: Utc::now(),
        };
        info!(
            version = next.version,
            samples = labels.len(),
            "Recalibrated ensemble weights"
        );
        self.store.publish(next.clone());
        Ok(next)
    }

    /// Nudge component weights toward components that correlate with acceptance.
    fn step_components(
        &self,
        current: &ComponentWeights,
        samples: &[&Sample],
        labels: &[f64],
    ) -> ComponentWeights {
        let mut next = current.as_array();
        for (j, w) in next.iter_mut().enumerate() {
            let xs: Vec<f64> = samples
                .iter()
                .map(|s| s.score.components.as_array()[j])
                .collect();
            let r = pearson(&xs, labels);
            *w += self.bounded(self.config.learning_rate * r);
        }
        ComponentWeights::from_array(project_simplex(next, self.config.min_weight))
    }

    /// Nudge model weights toward the models with the lowest Brier score.
    fn step_models(&self, current: &ModelWeights, samples: &[&Sample], labels: &[f64]) -> ModelWeights {
        let n = labels.len().max(1) as f64;
        let mut brier = [0.0; 3];
        for (sample, y) in samples.iter().zip(labels) {
            for (m, p) in sample.score.model_scores.as_array().iter().enumerate() {
                brier[m] += (p - y).powi(2) / n;
            }
        }
        let mean_brier = brier.iter().sum::<f64>() / 3.0;
        let mut next = current.as_array();
        // Relative advantage, so the step size does not depend on how noisy labels are.
        for (w, b) in next.iter_mut().zip(brier) {
            let advantage = (mean_brier - b) / mean_brier.max(1e-6);
            *w += self.bounded(self.config.learning_rate * advantage);
        }
        ModelWeights::from_array(project_simplex(next, self.config.min_weight))
    }

    fn bounded(&self, delta: f64) -> f64 {
        let cap = self.config.max_step.abs();
        if delta.is_finite() {
            delta.clamp(-cap, cap)
        } else {
            0.0
        }
    }
}

/// Pearson correlation; 0 when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mx = xs[..n].iter().sum::<f64>() / n as f64;
    let my = ys[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return 0.0;
    }
    (cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0)
}
