// src/core/scheduler.rs — One end-to-end analysis run, committed atomically

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::history::{RunHistory, RunMode, RunRecord, RunStatus};
use super::types::{EventWindow, Pattern, PatternCandidate, TimeWindow};
use crate::evaluator::calibration::CalibrationLoop;
use crate::evaluator::drift::DriftDetector;
use crate::evaluator::weights::EnsembleWeights;
use crate::evaluator::{QualityEnsemble, QualityScore};
use crate::infra::config::Config;
use crate::infra::errors::{EngineError, RunError};
use crate::memory::lifecycle::{Detection, LifecycleManager};
use crate::memory::{CommitSummary, PatternQuery, Persistence, RunCommit, SynergyQuery};
use crate::patterns::{deduplicate, CrossValidator, Detector, DetectorBank, PatternFilter};
use crate::provider::{ContextProvider, EventWindowProvider};
use crate::synergy::context::ContextSnapshot;
use crate::synergy::{Synergy, SynergyDetector};

#[derive(Debug, Clone, Copy)]
pub struct RunRequest {
    pub mode: RunMode,
    pub as_of: DateTime<Utc>,
}

impl RunRequest {
    pub fn full(as_of: DateTime<Utc>) -> Self {
        Self {
            mode: RunMode::Full,
            as_of,
        }
    }

    pub fn incremental(as_of: DateTime<Utc>) -> Self {
        Self {
            mode: RunMode::Incremental,
            as_of,
        }
    }
}

/// What a finished run hands to suggestion consumers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub record: RunRecord,
    /// Patterns selected this run, best first, as persisted.
    pub patterns: Vec<Pattern>,
    /// Synergies selected this run, best first, as persisted.
    pub synergies: Vec<Synergy>,
    pub commit: CommitSummary,
}

impl RunReport {
    fn skipped(record: RunRecord) -> Self {
        Self {
            record,
            patterns: Vec::new(),
            synergies: Vec::new(),
            commit: CommitSummary::default(),
        }
    }
}

/// Orchestrates detection, scoring, synergy mining and lifecycle
/// reconciliation. At most one run executes at a time.
pub struct AnalysisScheduler {
    config: Arc<Config>,
    events: Arc<dyn EventWindowProvider>,
    context: Option<Arc<dyn ContextProvider>>,
    persistence: Arc<dyn Persistence>,
    calibration: Arc<CalibrationLoop>,
    drift: Arc<DriftDetector>,
    bank: DetectorBank,
    filter: PatternFilter,
    cross_validator: CrossValidator,
    ensemble: QualityEnsemble,
    synergy: SynergyDetector,
    lifecycle: LifecycleManager,
    run_lock: tokio::sync::Mutex<()>,
    history: Mutex<RunHistory>,
}

impl AnalysisScheduler {
    pub fn new(
        config: Arc<Config>,
        events: Arc<dyn EventWindowProvider>,
        persistence: Arc<dyn Persistence>,
        calibration: Arc<CalibrationLoop>,
        drift: Arc<DriftDetector>,
    ) -> Self {
        let actionable = &config.filter.actionable_domains;
        Self {
            bank: DetectorBank::new(
                Detector::enabled(&config.detectors),
                config.analysis.max_workers,
                Duration::from_secs(config.analysis.detector_timeout_secs),
            ),
            filter: PatternFilter::new(config.filter.clone()),
            cross_validator: CrossValidator::new(&config.cross_validation),
            ensemble: QualityEnsemble::new(config.quality.clone(), actionable),
            synergy: SynergyDetector::new(config.synergy.clone(), actionable),
            lifecycle: LifecycleManager::new(
                config.lifecycle.clone(),
                config.analysis.occurrence_window_days,
            ),
            history: Mutex::new(RunHistory::new(config.analysis.history_size)),
            run_lock: tokio::sync::Mutex::new(()),
            context: None,
            config,
            events,
            persistence,
            calibration,
            drift,
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Runs recorded by this process, newest first.
    pub fn recent_runs(&self, limit: usize) -> Vec<RunRecord> {
        match self.history.lock() {
            Ok(h) => h.recent(limit),
            Err(poisoned) => poisoned.into_inner().recent(limit),
        }
    }

    fn remember(&self, record: RunRecord) {
        match self.history.lock() {
            Ok(mut h) => h.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    /// Execute one run. A concurrent call fails with `RunInProgress`;
    /// failures are tagged with the run id and recorded in run history.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Err(RunError::new(run_id, EngineError::RunInProgress));
        };

        let weights = self.calibration.weights().snapshot();
        let mut record = RunRecord::start(run_id, request.mode, request.as_of, weights.version);
        let span = info_span!("analysis_run", run_id = %run_id, mode = request.mode.as_str());

        let result = self
            .execute(&request, &weights, &mut record, &cancel)
            .instrument(span.clone())
            .await;

        match result {
            Ok(report) => {
                self.remember(report.record.clone());
                Ok(report)
            }
            Err(error) => {
                let failed = match error {
                    EngineError::Cancelled => record.finish(RunStatus::Cancelled),
                    _ => record.fail(&error),
                };
                async {
                    warn!("Run ended without commit: {}", error);
                    if let Err(e) = self.persistence.record_run(&failed).await {
                        warn!("Could not record failed run: {}", e);
                    }
                }
                .instrument(span)
                .await;
                self.remember(failed);
                Err(RunError::new(run_id, error))
            }
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        weights: &EnsembleWeights,
        record: &mut RunRecord,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let as_of = request.as_of;
        let window = TimeWindow::trailing(as_of, self.config.analysis.lookback_days);
        let events = self.events.get_events(window.start, window.end).await?;
        record.stages.events = events.len();
        info!(events = events.len(), "Analysis run started");

        // Incremental runs only consider findings touching devices with new events.
        let touched: Option<(BTreeSet<String>, BTreeSet<String>)> = match request.mode {
            RunMode::Full => None,
            RunMode::Incremental => {
                let watermark = self.persistence.watermark().await?;
                let fresh = events
                    .iter()
                    .filter(|e| watermark.map_or(true, |w| e.timestamp > w));
                let mut devices = BTreeSet::new();
                let mut entities = BTreeSet::new();
                for e in fresh {
                    devices.insert(e.device_id.clone());
                    entities.insert(e.entity_id.clone());
                }
                if devices.is_empty() {
                    info!("No new events since last run, skipping");
                    let skipped = record.clone().finish(RunStatus::Skipped);
                    self.persistence.record_run(&skipped).await?;
                    *record = skipped.clone();
                    return Ok(RunReport::skipped(skipped));
                }
                Some((devices, entities))
            }
        };
        let newest = events.last().map(|e| e.timestamp);
        let event_window = EventWindow::new(window, events)?;

        // Detection and candidate refinement.
        let outcome = self.bank.run(&event_window, cancel).await?;
        record.stages.detected = outcome.candidates.len();
        record.failures = outcome.failures;
        let mut candidates = outcome.candidates;
        if let Some((devices, _)) = &touched {
            candidates.retain(|c| c.device_ids.iter().any(|d| devices.contains(d)));
        }

        let (candidates, filter_stats) = self.filter.apply(candidates);
        record.stages.filtered = filter_stats.kept;
        record.filter = filter_stats;

        let (mut candidates, dedup_stats) = deduplicate(candidates, window.start);
        record.stages.deduplicated = dedup_stats.output;
        record.dedup = dedup_stats;

        record.stages.corroborated = self.cross_validator.apply(&mut candidates);

        // Scoring against the snapshot taken at run start.
        let existing_patterns = self.persistence.get_patterns(&PatternQuery::default()).await?;
        let known: BTreeSet<String> = existing_patterns.iter().map(|p| p.id.clone()).collect();
        let selection = self.ensemble.select(
            candidates,
            weights,
            as_of,
            self.config.analysis.top_n,
            &known,
        );
        record.stages.above_threshold = selection.above_threshold();
        let selected_scores: Vec<_> = selection.selected.iter().map(|(_, s)| s.clone()).collect();
        if self.drift.baseline().is_some() {
            let composites: Vec<f64> = selected_scores.iter().map(|s| s.composite).collect();
            record.drift = Some(self.drift.check(&composites));
        }
        let mut scores = selected_scores;
        scores.extend(selection.refreshed.iter().map(|(_, s)| s.clone()));
        self.calibration.observe_scores(&scores);

        let to_pattern = |(c, s): &(PatternCandidate, QualityScore)| {
            Pattern::from_candidate(c, s.composite, as_of)
        };
        let detected: Vec<Pattern> = selection.selected.iter().map(to_pattern).collect();
        let refreshed_patterns: Vec<Pattern> = selection.refreshed.iter().map(to_pattern).collect();

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Synergies, corroborated by live persisted patterns and this run's.
        let context = self.fetch_context(as_of, record).await;
        let mut corroborating: Vec<Pattern> = existing_patterns
            .iter()
            .filter(|p| !contains_id(&detected, &p.id))
            .cloned()
            .collect();
        corroborating.extend(detected.iter().cloned());
        let synergy_outcome =
            self.synergy
                .detect(&event_window.events, &corroborating, context.as_ref(), as_of);
        record.stages.synergy_edges = synergy_outcome.edges_considered;

        let existing_synergies = self.persistence.get_synergies(&SynergyQuery::default()).await?;
        let known_synergies: BTreeSet<&str> =
            existing_synergies.iter().map(|s| s.id.as_str()).collect();
        // Ranked by benefit already. Known ids past top_n are refreshed only.
        let mut synergies: Vec<Synergy> = Vec::new();
        let mut refreshed_synergies: Vec<Synergy> = Vec::new();
        for synergy in synergy_outcome.synergies {
            if let Some((_, entities)) = &touched {
                if !synergy.action_chain.iter().any(|e| entities.contains(e)) {
                    continue;
                }
            }
            if synergies.len() < self.config.synergy.top_n {
                synergies.push(synergy);
            } else if known_synergies.contains(synergy.id.as_str()) {
                refreshed_synergies.push(synergy);
            }
        }

        // Reconcile with persisted state and commit everything at once.
        let selected_patterns: Vec<String> = detected.iter().map(|p| p.id.clone()).collect();
        let selected_synergies: Vec<String> = synergies.iter().map(|s| s.id.clone()).collect();
        record.stages.persisted_patterns = selected_patterns.len();
        record.stages.persisted_synergies = selected_synergies.len();

        let plan = self.lifecycle.plan(
            &existing_patterns,
            &existing_synergies,
            Detection {
                patterns: detected,
                synergies,
                refreshed_patterns,
                refreshed_synergies,
                window_start: Some(window.start.date_naive()),
            },
            as_of,
        );
        record.lifecycle = Some(plan.report.clone());

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let finished = record.clone().finish(RunStatus::Succeeded);
        let commit = RunCommit {
            run: finished.clone(),
            plan,
            scores,
            watermark: newest,
            score_retention_runs: self.config.analysis.score_retention_runs,
        };
        let summary = self.persistence.commit_run(&commit).await?;
        *record = finished.clone();

        // The plan only lists rows that changed; unchanged selections are
        // reported as they already stand in the store.
        let mut patterns: Vec<Pattern> = selected_patterns
            .iter()
            .filter_map(|id| {
                commit
                    .plan
                    .patterns
                    .iter()
                    .chain(existing_patterns.iter())
                    .find(|p| &p.id == id)
                    .cloned()
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut synergies: Vec<Synergy> = selected_synergies
            .iter()
            .filter_map(|id| {
                commit
                    .plan
                    .synergies
                    .iter()
                    .chain(existing_synergies.iter())
                    .find(|s| &s.id == id)
                    .cloned()
            })
            .collect();
        synergies.sort_by(|a, b| {
            b.benefit_score
                .total_cmp(&a.benefit_score)
                .then_with(|| a.id.cmp(&b.id))
        });

        info!(
            patterns = patterns.len(),
            synergies = synergies.len(),
            refreshed = commit.plan.report.refreshed,
            failures = finished.failures.len(),
            "Analysis run committed"
        );
        Ok(RunReport {
            record: finished,
            patterns,
            synergies,
            commit: summary,
        })
    }

    /// Context never fails a run: timeouts and errors degrade to `None`.
    async fn fetch_context(
        &self,
        as_of: DateTime<Utc>,
        record: &mut RunRecord,
    ) -> Option<ContextSnapshot> {
        let provider = self.context.as_ref()?;
        let timeout = Duration::from_millis(self.config.analysis.context_timeout_ms);
        match tokio::time::timeout(timeout, provider.snapshot(as_of)).await {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                warn!(provider = provider.id(), "Context unavailable, scoring unweighted: {}", e);
                record.enrichment_degraded = true;
                None
            }
            Err(_) => {
                warn!(
                    provider = provider.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Context timed out, scoring unweighted"
                );
                record.enrichment_degraded = true;
                None
            }
        }
    }
}

fn contains_id(patterns: &[Pattern], id: &str) -> bool {
    patterns.iter().any(|p| p.id == id)
}
