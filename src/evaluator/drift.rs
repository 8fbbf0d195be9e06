// src/evaluator/drift.rs — Quality-distribution drift against an operator-captured baseline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::infra::config::DriftConfig;

const PSI_EPSILON: f64 = 1e-4;

/// Summary of a reference quality-score distribution over [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDistribution {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Proportion of scores per equal-width bin.
    pub histogram: Vec<f64>,
    pub captured_at: DateTime<Utc>,
}

impl BaselineDistribution {
    pub fn capture(scores: &[f64], bins: usize) -> Self {
        let (mean, std_dev) = moments(scores);
        Self {
            count: scores.len(),
            mean,
            std_dev,
            histogram: proportions(scores, bins.max(1)),
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub drifted: bool,
    /// Population stability index; 0 when nothing could be compared.
    pub magnitude: f64,
    pub mean_shift: f64,
    pub p_value: Option<f64>,
    pub sample_count: usize,
    pub explanation: String,
}

impl DriftReport {
    fn not_drifted(sample_count: usize, explanation: impl Into<String>) -> Self {
        Self {
            drifted: false,
            magnitude: 0.0,
            mean_shift: 0.0,
            p_value: None,
            sample_count,
            explanation: explanation.into(),
        }
    }
}

/// Compares live quality scores to the baseline. Observability only:
/// a drift report never changes weights or thresholds.
pub struct DriftDetector {
    config: DriftConfig,
    baseline: RwLock<Option<Arc<BaselineDistribution>>>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig, baseline: Option<BaselineDistribution>) -> Self {
        Self {
            config,
            baseline: RwLock::new(baseline.map(Arc::new)),
        }
    }

    pub fn baseline(&self) -> Option<Arc<BaselineDistribution>> {
        match self.baseline.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the baseline with the given scores. Operator action only.
    pub fn capture_baseline(&self, scores: &[f64]) -> BaselineDistribution {
        let baseline = BaselineDistribution::capture(scores, self.config.bins);
        let next = Some(Arc::new(baseline.clone()));
        match self.baseline.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        baseline
    }

    pub fn check(&self, current: &[f64]) -> DriftReport {
        let Some(baseline) = self.baseline() else {
            return DriftReport::not_drifted(current.len(), "no baseline captured yet");
        };
        if current.is_empty() {
            return DriftReport::not_drifted(0, "no current quality scores to compare");
        }
        if current.len() < self.config.min_samples {
            return DriftReport::not_drifted(
                current.len(),
                format!(
                    "only {} current scores, need {} for a stable comparison",
                    current.len(),
                    self.config.min_samples
                ),
            );
        }

        let bins = baseline.histogram.len().max(1);
        let now = proportions(current, bins);
        let psi: f64 = baseline
            .histogram
            .iter()
            .zip(&now)
            .map(|(b, c)| {
                let b = b.max(PSI_EPSILON);
                let c = c.max(PSI_EPSILON);
                (c - b) * (c / b).ln()
            })
            .sum();

        let (mean, _) = moments(current);
        let mean_shift = mean - baseline.mean;
        let p_value = mean_shift_p_value(mean_shift, baseline.std_dev, current.len());
        let drifted = psi > self.config.threshold;

        let mut explanation = format!(
            "PSI {:.3} vs threshold {:.2}; mean {:.3} -> {:.3}",
            psi, self.config.threshold, baseline.mean, mean
        );
        if let Some(p) = p_value {
            explanation.push_str(&format!(" (mean-shift p={p:.4})"));
        }
        if drifted {
            warn!(psi, mean_shift, "Quality distribution drifted from baseline");
        }

        DriftReport {
            drifted,
            magnitude: psi,
            mean_shift,
            p_value,
            sample_count: current.len(),
            explanation,
        }
    }
}

fn moments(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn proportions(values: &[f64], bins: usize) -> Vec<f64> {
    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = ((v.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let n = values.len().max(1) as f64;
    counts.into_iter().map(|c| c as f64 / n).collect()
}

/// Two-sided z-test of the current mean against the baseline.
fn mean_shift_p_value(shift: f64, baseline_std: f64, n: usize) -> Option<f64> {
    let std_err = baseline_std.max(1e-6) / (n as f64).sqrt();
    let z = shift / std_err;
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some((2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0))
}
