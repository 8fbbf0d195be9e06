// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::evaluator::weights::{ComponentWeights, ModelWeights};
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub detectors: DetectorsConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub cross_validation: CrossValidationConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub drift: DriftConfig,

    #[serde(default)]
    pub synergy: SynergyConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    /// HTTP observability API (optional section in config.toml).
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Trailing window evaluated by every run (full or incremental).
    pub lookback_days: u32,
    /// Window that bounds a persisted pattern's `occurrences`.
    pub occurrence_window_days: u32,
    /// Maximum number of new patterns persisted per run.
    pub top_n: usize,
    pub max_workers: usize,
    pub detector_timeout_secs: u64,
    pub context_timeout_ms: u64,
    /// In-memory run history retained for observability.
    pub history_size: usize,
    /// Runs whose quality scores are kept in storage.
    pub score_retention_runs: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            occurrence_window_days: 30,
            top_n: 10,
            max_workers: 4,
            detector_timeout_secs: 30,
            context_timeout_ms: 2_000,
            history_size: 50,
            score_retention_runs: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    /// Detector names to run; empty means all.
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Two activations closer than this are considered related.
    pub pair_window_secs: i64,
    /// Idle gap that splits activity sessions.
    pub session_gap_secs: i64,
    /// Floor below which detectors do not bother emitting a candidate.
    pub min_support: usize,
    /// Seed shared by the ML sub-models.
    pub seed: u64,
    /// Samples needed before an ML sub-model is fitted instead of the heuristic.
    pub min_fit_samples: usize,
    pub kmeans_clusters: usize,
    pub kmeans_epochs: usize,
    pub kmeans_batch_size: usize,
    pub max_spread_minutes: f64,
    pub concentration_ratio: f64,
    pub duration_max_cv: f64,
    pub day_type_skew: f64,
    pub seasonal_min_span_days: i64,
    pub seasonal_ratio: f64,
    pub anomaly_threshold: f64,
    pub anomaly_min_days: usize,
    pub forest_trees: usize,
    pub forest_sample_size: usize,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            pair_window_secs: 300,
            session_gap_secs: 1_800,
            min_support: 3,
            seed: 42,
            min_fit_samples: 20,
            kmeans_clusters: 3,
            kmeans_epochs: 10,
            kmeans_batch_size: 16,
            max_spread_minutes: 45.0,
            concentration_ratio: 0.6,
            duration_max_cv: 0.5,
            day_type_skew: 0.5,
            seasonal_min_span_days: 60,
            seasonal_ratio: 2.0,
            anomaly_threshold: 0.65,
            anomaly_min_days: 14,
            forest_trees: 50,
            forest_sample_size: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_occurrences: u32,
    pub min_confidence: f64,
    /// Candidates touching any of these domains are dropped.
    pub excluded_domains: Vec<String>,
    /// At least one device must live in one of these domains.
    pub actionable_domains: Vec<String>,
    /// Per pattern type overrides, keyed by pattern type name.
    #[serde(default)]
    pub overrides: BTreeMap<String, ThresholdOverride>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 5,
            min_confidence: 0.5,
            excluded_domains: ["sensor", "sun", "weather", "zone", "update", "automation"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            actionable_domains: [
                "light",
                "switch",
                "lock",
                "climate",
                "fan",
                "cover",
                "media_player",
                "vacuum",
                "scene",
                "alarm_control_panel",
                "input_boolean",
                "water_heater",
                "humidifier",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdOverride {
    pub min_occurrences: Option<u32>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    /// Multiplicative confidence bonus for corroborated relationships.
    pub bonus: f64,
    pub min_detectors: usize,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            bonus: 1.2,
            min_detectors: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub persistence_threshold: f64,
    /// Fixed weights of the base heuristic model.
    #[serde(default)]
    pub base_weights: ComponentWeights,
    /// Starting second-level weights before any calibration.
    #[serde(default)]
    pub initial_model_weights: ModelWeights,
    /// Share of the RL model's score taken from the learned per-type value.
    pub rl_blend: f64,
    pub recency_half_life_days: f64,
    pub frequency_target_per_day: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            persistence_threshold: 0.5,
            base_weights: ComponentWeights::default(),
            initial_model_weights: ModelWeights::default(),
            rl_blend: 0.5,
            recency_half_life_days: 7.0,
            frequency_target_per_day: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_samples: usize,
    pub learning_rate: f64,
    /// Largest change any single weight may take in one recalibration.
    pub max_step: f64,
    pub min_weight: f64,
    pub rl_learning_rate: f64,
    pub high_tier: f64,
    pub medium_tier: f64,
    /// Feedback samples retained for recalibration.
    pub max_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            learning_rate: 0.1,
            max_step: 0.05,
            min_weight: 0.02,
            rl_learning_rate: 0.1,
            high_tier: 0.7,
            medium_tier: 0.4,
            max_samples: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Population stability index above which drift is flagged.
    pub threshold: f64,
    pub bins: usize,
    pub min_samples: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            bins: 10,
            min_samples: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynergyConfig {
    pub window_secs: i64,
    pub min_support: usize,
    pub min_confidence: f64,
    /// Confidence bonus when a persisted pattern covers both devices.
    pub pattern_boost: f64,
    pub max_chain_length: usize,
    pub max_chains: usize,
    pub chain_discount: f64,
    pub top_n: usize,
    #[serde(default)]
    pub context: ContextBoostConfig,
}

impl Default for SynergyConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            min_support: 5,
            min_confidence: 0.3,
            pattern_boost: 0.15,
            max_chain_length: 4,
            max_chains: 20,
            chain_discount: 0.9,
            top_n: 10,
            context: ContextBoostConfig::default(),
        }
    }
}

/// Multi-modal context coefficients. Tunable; the combined multiplier is
/// always clamped to `1 ± cap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBoostConfig {
    pub cap: f64,
    pub weather: f64,
    pub energy: f64,
    pub calendar: f64,
}

impl Default for ContextBoostConfig {
    fn default() -> Self {
        Self {
            cap: 0.2,
            weather: 0.1,
            energy: 0.1,
            calendar: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Undetected this long: active → needs_review.
    pub needs_review_days: i64,
    /// Undetected this long: → deprecated.
    pub deprecate_days: i64,
    /// Deprecated this long: hard delete.
    pub purge_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            needs_review_days: 14,
            deprecate_days: 30,
            purge_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            backoff_factor: 2.0,
            max_delay_ms: 5_000,
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8787
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break scoring invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.analysis.max_workers == 0 {
            anyhow::bail!("analysis.max_workers must be at least 1");
        }
        if self.analysis.score_retention_runs == 0 {
            anyhow::bail!("analysis.score_retention_runs must be at least 1");
        }
        if self.cross_validation.bonus < 1.0 {
            anyhow::bail!("cross_validation.bonus must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.synergy.context.cap) {
            anyhow::bail!("synergy.context.cap must be within [0, 1]");
        }
        if self.calibration.medium_tier > self.calibration.high_tier {
            anyhow::bail!("calibration.medium_tier must not exceed calibration.high_tier");
        }
        if self.lifecycle.needs_review_days > self.lifecycle.deprecate_days {
            anyhow::bail!("lifecycle.needs_review_days must not exceed lifecycle.deprecate_days");
        }
        Ok(())
    }
}
