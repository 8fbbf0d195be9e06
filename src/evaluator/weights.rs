// src/evaluator/weights.rs — Versioned, simplex-constrained ensemble weights

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::core::types::PatternType;

/// Per-component weights of a single scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub actionability: f64,
    pub consistency: f64,
    pub frequency: f64,
    pub recency: f64,
    pub automation_potential: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            actionability: 0.25,
            consistency: 0.20,
            frequency: 0.20,
            recency: 0.15,
            automation_potential: 0.20,
        }
    }
}

impl ComponentWeights {
    pub const NAMES: [&'static str; 5] = [
        "actionability",
        "consistency",
        "frequency",
        "recency",
        "automation_potential",
    ];

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.actionability,
            self.consistency,
            self.frequency,
            self.recency,
            self.automation_potential,
        ]
    }

    pub fn from_array(values: [f64; 5]) -> Self {
        Self {
            actionability: values[0],
            consistency: values[1],
            frequency: values[2],
            recency: values[3],
            automation_potential: values[4],
        }
    }
}

/// Second-level weights combining the three scoring models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelWeights {
    pub base: f64,
    pub calibrated: f64,
    pub rl: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            base: 0.4,
            calibrated: 0.3,
            rl: 0.3,
        }
    }
}

impl ModelWeights {
    pub const NAMES: [&'static str; 3] = ["base", "calibrated", "rl"];

    pub fn as_array(&self) -> [f64; 3] {
        [self.base, self.calibrated, self.rl]
    }

    pub fn from_array(values: [f64; 3]) -> Self {
        Self {
            base: values[0],
            calibrated: values[1],
            rl: values[2],
        }
    }
}

/// Complete learned scoring state. Replaced wholesale on recalibration,
/// never mutated in place once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub version: u64,
    pub components: ComponentWeights,
    pub models: ModelWeights,
    /// Learned value estimate per pattern type, in [0, 1].
    #[serde(default)]
    pub rl_values: BTreeMap<PatternType, f64>,
    pub last_updated: DateTime<Utc>,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self::initial(ComponentWeights::default(), ModelWeights::default())
    }
}

impl EnsembleWeights {
    pub fn initial(components: ComponentWeights, models: ModelWeights) -> Self {
        Self {
            version: 0,
            components: ComponentWeights::from_array(project_simplex(components.as_array(), 0.0)),
            models: ModelWeights::from_array(project_simplex(models.as_array(), 0.0)),
            rl_values: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Learned value for a pattern type, neutral until feedback arrives.
    pub fn rl_value(&self, pattern_type: PatternType) -> f64 {
        self.rl_values.get(&pattern_type).copied().unwrap_or(0.5)
    }

    /// True when both weight vectors lie on the probability simplex.
    pub fn is_valid(&self) -> bool {
        on_simplex(&self.components.as_array()) && on_simplex(&self.models.as_array())
    }
}

fn on_simplex(values: &[f64]) -> bool {
    let sum: f64 = values.iter().sum();
    values.iter().all(|w| (0.0..=1.0).contains(w)) && (sum - 1.0).abs() < 1e-6
}

/// Clamp every weight to `[min_weight, 1]`, then renormalize to sum 1.
/// A degenerate (all-zero or non-finite) vector becomes uniform.
pub fn project_simplex<const N: usize>(values: [f64; N], min_weight: f64) -> [f64; N] {
    let floor = min_weight.clamp(0.0, 1.0 / N as f64);
    let mut out = values.map(|v| if v.is_finite() { v.clamp(floor, 1.0) } else { floor });
    let sum: f64 = out.iter().sum();
    if sum <= f64::EPSILON {
        return [1.0 / N as f64; N];
    }
    for w in out.iter_mut() {
        *w /= sum;
    }
    out
}

/// Shared holder for the current weights. Runs take a snapshot at start;
/// recalibration publishes a new `Arc` without disturbing in-flight runs.
#[derive(Debug, Clone)]
pub struct WeightStore {
    current: Arc<RwLock<Arc<EnsembleWeights>>>,
}

impl WeightStore {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(weights))),
        }
    }

    pub fn snapshot(&self) -> Arc<EnsembleWeights> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn publish(&self, weights: EnsembleWeights) {
        let next = Arc::new(weights);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl Default for WeightStore {
    fn default() -> Self {
        Self::new(EnsembleWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_on_simplex() {
        let w = EnsembleWeights::default();
        assert!(w.is_valid());
        assert_eq!(w.version, 0);
        assert!((w.rl_value(PatternType::Sequence) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_project_clamps_and_normalizes() {
        let out = project_simplex([2.0, -1.0, 0.0], 0.05);
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(out.iter().all(|w| *w > 0.0 && *w <= 1.0));
        assert!(out[0] > out[1]);
    }

    #[test]
    fn test_project_degenerate_is_uniform() {
        let out = project_simplex([0.0, 0.0, 0.0, 0.0], 0.0);
        assert_eq!(out, [0.25; 4]);
        let out = project_simplex([f64::NAN, 0.0], 0.0);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn test_snapshot_is_stable_across_publish() {
        let store = WeightStore::default();
        let before = store.snapshot();
        let mut next = (*before).clone();
        next.version = 7;
        store.publish(next);
        assert_eq!(before.version, 0);
        assert_eq!(store.snapshot().version, 7);
    }
}
