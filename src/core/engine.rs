// src/core/engine.rs — Wires the scheduler, calibration and drift state to storage

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scheduler::{AnalysisScheduler, RunReport, RunRequest};
use super::types::Feedback;
use crate::evaluator::calibration::{CalibrationLoop, TierReport};
use crate::evaluator::drift::{BaselineDistribution, DriftDetector, DriftReport};
use crate::evaluator::weights::{EnsembleWeights, WeightStore};
use crate::infra::config::Config;
use crate::infra::errors::{EngineError, RunError};
use crate::memory::lifecycle::{Detection, LifecycleManager, LifecycleReport};
use crate::memory::{PatternQuery, Persistence, SynergyQuery};
use crate::provider::{ContextProvider, EventWindowProvider};

/// Scores considered when capturing a baseline or checking drift.
const DRIFT_SAMPLE_LIMIT: usize = 500;

/// Long-lived engine state shared by the CLI and the HTTP API.
pub struct Engine {
    config: Arc<Config>,
    persistence: Arc<dyn Persistence>,
    calibration: Arc<CalibrationLoop>,
    drift: Arc<DriftDetector>,
    scheduler: AnalysisScheduler,
    lifecycle: LifecycleManager,
}

impl Engine {
    /// Restore weights, baseline and calibration samples from storage.
    pub async fn open(
        config: Config,
        events: Arc<dyn EventWindowProvider>,
        persistence: Arc<dyn Persistence>,
        context: Option<Arc<dyn ContextProvider>>,
    ) -> Result<Self, EngineError> {
        let config = Arc::new(config);
        let initial = EnsembleWeights::initial(
            config.quality.base_weights,
            config.quality.initial_model_weights,
        );
        let weights = match persistence.load_weights().await? {
            Some(w) if w.is_valid() => w,
            Some(w) => {
                warn!(version = w.version, "Stored weights off the simplex, starting fresh");
                initial
            }
            None => initial,
        };
        info!(version = weights.version, "Ensemble weights loaded");

        let calibration = Arc::new(CalibrationLoop::new(
            config.calibration.clone(),
            WeightStore::new(weights),
        ));
        let history = persistence
            .calibration_history(config.calibration.max_samples)
            .await?;
        let restored = calibration.restore(&history.scores, &history.feedback);
        if restored > 0 {
            info!(samples = restored, "Calibration samples restored");
        }

        let baseline = persistence.load_baseline().await?;
        let drift = Arc::new(DriftDetector::new(config.drift.clone(), baseline));

        let mut scheduler = AnalysisScheduler::new(
            Arc::clone(&config),
            events,
            Arc::clone(&persistence),
            Arc::clone(&calibration),
            Arc::clone(&drift),
        );
        if let Some(context) = context {
            scheduler = scheduler.with_context(context);
        }
        let lifecycle = LifecycleManager::new(
            config.lifecycle.clone(),
            config.analysis.occurrence_window_days,
        );

        Ok(Self {
            config,
            persistence,
            calibration,
            drift,
            scheduler,
            lifecycle,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn scheduler(&self) -> &AnalysisScheduler {
        &self.scheduler
    }

    pub fn weights(&self) -> Arc<EnsembleWeights> {
        self.calibration.weights().snapshot()
    }

    pub fn tier_report(&self) -> TierReport {
        self.calibration.tier_report()
    }

    pub async fn analyze(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.scheduler.run(request, cancel).await
    }

    /// Append feedback to the log and feed it to calibration. Returns whether
    /// the target had a known score.
    pub async fn submit_feedback(&self, feedback: &Feedback) -> Result<bool, EngineError> {
        self.persistence.record_feedback(feedback).await?;
        Ok(self.calibration.record_feedback(feedback))
    }

    /// Recalibrate and persist the new weights. Too few samples is a no-op
    /// reported as `CalibrationDataInsufficient`.
    pub async fn recalibrate(&self) -> Result<EnsembleWeights, EngineError> {
        let weights = self.calibration.recalibrate()?;
        self.persistence.save_weights(&weights).await?;
        Ok(weights)
    }

    pub async fn capture_baseline(&self) -> Result<BaselineDistribution, EngineError> {
        let scores = self.persistence.recent_composites(DRIFT_SAMPLE_LIMIT).await?;
        if scores.is_empty() {
            return Err(EngineError::Input(
                "no quality scores recorded yet; run an analysis first".into(),
            ));
        }
        let baseline = self.drift.capture_baseline(&scores);
        self.persistence.save_baseline(&baseline).await?;
        info!(samples = baseline.count, mean = baseline.mean, "Baseline captured");
        Ok(baseline)
    }

    pub async fn check_drift(&self) -> Result<DriftReport, EngineError> {
        let scores = self.persistence.recent_composites(DRIFT_SAMPLE_LIMIT).await?;
        Ok(self.drift.check(&scores))
    }

    /// Standalone lifecycle pass over everything persisted.
    pub async fn run_lifecycle(&self, as_of: DateTime<Utc>) -> Result<LifecycleReport, EngineError> {
        if self.scheduler.is_running() {
            return Err(EngineError::RunInProgress);
        }
        let patterns = self.persistence.get_patterns(&PatternQuery::default()).await?;
        let synergies = self.persistence.get_synergies(&SynergyQuery::default()).await?;
        let plan = self
            .lifecycle
            .plan(&patterns, &synergies, Detection::default(), as_of);
        if !plan.is_empty() {
            self.persistence.apply_lifecycle(&plan).await?;
        }
        info!(
            needs_review = plan.report.needs_review,
            deprecated = plan.report.deprecated,
            purged = plan.report.purged,
            "Lifecycle pass complete"
        );
        Ok(plan.report)
    }
}
