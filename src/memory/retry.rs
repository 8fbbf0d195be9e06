// src/memory/retry.rs — Retry with exponential backoff for persistence
//
// Wraps any Persistence with automatic retry on transient storage failures
// (SQLite busy/locked, errors flagged retriable). Everything else fails fast.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::lifecycle::LifecyclePlan;
use super::{CalibrationHistory, CommitSummary, Persistence, PatternQuery, RunCommit, SynergyQuery};
use crate::core::history::RunRecord;
use crate::core::types::{Feedback, Pattern};
use crate::evaluator::drift::BaselineDistribution;
use crate::evaluator::weights::EnsembleWeights;
use crate::infra::config::RetrySettings;
use crate::infra::errors::EngineError;
use crate::synergy::Synergy;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            backoff_factor: s.backoff_factor,
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter_fraction: s.jitter_fraction,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let jitter = deterministic_jitter(attempt, self.jitter_fraction);
        Duration::from_millis((capped_ms * jitter).max(0.0) as u64)
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in tests.
/// Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// retry budget is spent.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, name: &str, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, EngineError>> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after storage error: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(operation = name, attempts = attempt + 1, "Giving up: {}", e);
                }
                return Err(e);
            }
        }
    }
}

/// A persistence wrapper that adds retry with exponential backoff.
pub struct RetryPersistence {
    inner: Arc<dyn Persistence>,
    config: RetryConfig,
}

impl RetryPersistence {
    pub fn new(inner: Arc<dyn Persistence>) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn Persistence>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Persistence for RetryPersistence {
    async fn upsert_patterns(&self, patterns: &[Pattern]) -> Result<usize, EngineError> {
        with_retry(&self.config, "upsert_patterns", || self.inner.upsert_patterns(patterns)).await
    }

    async fn upsert_synergies(&self, synergies: &[Synergy]) -> Result<usize, EngineError> {
        with_retry(&self.config, "upsert_synergies", || {
            self.inner.upsert_synergies(synergies)
        })
        .await
    }

    async fn get_active_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        with_retry(&self.config, "get_active_patterns", || {
            self.inner.get_active_patterns(query)
        })
        .await
    }

    async fn get_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        with_retry(&self.config, "get_patterns", || self.inner.get_patterns(query)).await
    }

    async fn get_synergies(&self, query: &SynergyQuery) -> Result<Vec<Synergy>, EngineError> {
        with_retry(&self.config, "get_synergies", || self.inner.get_synergies(query)).await
    }

    async fn record_feedback(&self, feedback: &Feedback) -> Result<(), EngineError> {
        with_retry(&self.config, "record_feedback", || self.inner.record_feedback(feedback)).await
    }

    async fn calibration_history(&self, limit: usize) -> Result<CalibrationHistory, EngineError> {
        with_retry(&self.config, "calibration_history", || {
            self.inner.calibration_history(limit)
        })
        .await
    }

    async fn commit_run(&self, commit: &RunCommit) -> Result<CommitSummary, EngineError> {
        with_retry(&self.config, "commit_run", || self.inner.commit_run(commit)).await
    }

    async fn apply_lifecycle(&self, plan: &LifecyclePlan) -> Result<CommitSummary, EngineError> {
        with_retry(&self.config, "apply_lifecycle", || self.inner.apply_lifecycle(plan)).await
    }

    async fn load_weights(&self) -> Result<Option<EnsembleWeights>, EngineError> {
        with_retry(&self.config, "load_weights", || self.inner.load_weights()).await
    }

    async fn save_weights(&self, weights: &EnsembleWeights) -> Result<(), EngineError> {
        with_retry(&self.config, "save_weights", || self.inner.save_weights(weights)).await
    }

    async fn load_baseline(&self) -> Result<Option<BaselineDistribution>, EngineError> {
        with_retry(&self.config, "load_baseline", || self.inner.load_baseline()).await
    }

    async fn save_baseline(&self, baseline: &BaselineDistribution) -> Result<(), EngineError> {
        with_retry(&self.config, "save_baseline", || self.inner.save_baseline(baseline)).await
    }

    async fn recent_composites(&self, limit: usize) -> Result<Vec<f64>, EngineError> {
        with_retry(&self.config, "recent_composites", || {
            self.inner.recent_composites(limit)
        })
        .await
    }

    async fn watermark(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        with_retry(&self.config, "watermark", || self.inner.watermark()).await
    }

    async fn record_run(&self, run: &RunRecord) -> Result<(), EngineError> {
        with_retry(&self.config, "record_run", || self.inner.record_run(run)).await
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError> {
        with_retry(&self.config, "list_runs", || self.inner.list_runs(limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.2,
        }
    }

    fn busy() -> EngineError {
        EngineError::Persistence {
            message: "database is locked".into(),
            retriable: true,
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "commit_run", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(busy())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), "commit_run", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(busy()) }
        })
        .await;
        assert!(result.unwrap_err().is_retriable());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retriable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), "commit_run", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Input("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig::default();
        let first = config.delay_for_attempt(0);
        let second = config.delay_for_attempt(1);
        assert!(second > first);
        let capped = config.delay_for_attempt(20);
        assert!(capped <= Duration::from_millis(6_000));
    }

    #[test]
    fn test_jitter_bounds() {
        for attempt in 0..10 {
            let j = deterministic_jitter(attempt, 0.2);
            assert!((0.8..=1.2).contains(&j));
        }
    }
}
