// src/patterns/bank.rs — Parallel, failure-isolated detector execution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::detector::Detector;
use crate::core::types::{EventWindow, PatternCandidate, PatternType};
use crate::infra::errors::EngineError;

/// A detector that produced nothing because it errored, panicked or timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorFailure {
    pub detector: PatternType,
    pub message: String,
}

impl From<&DetectorFailure> for EngineError {
    fn from(f: &DetectorFailure) -> Self {
        EngineError::DetectorFailure {
            detector: f.detector.to_string(),
            message: f.message.clone(),
        }
    }
}

/// Merged output of every detector in the bank.
#[derive(Debug, Clone, Default)]
pub struct BankOutcome {
    /// Sorted by (pattern type, device ids) so downstream stages see a stable order.
    pub candidates: Vec<PatternCandidate>,
    pub per_detector: BTreeMap<PatternType, usize>,
    pub failures: Vec<DetectorFailure>,
}

/// Runs the enabled detectors on a bounded pool of blocking workers.
pub struct DetectorBank {
    detectors: Vec<Detector>,
    max_workers: usize,
    timeout: Duration,
}

impl DetectorBank {
    pub fn new(detectors: Vec<Detector>, max_workers: usize, timeout: Duration) -> Self {
        Self {
            detectors,
            max_workers: max_workers.max(1),
            timeout,
        }
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Fan out over the shared window. Individual detector failures are
    /// collected, not propagated; only cancellation aborts.
    pub async fn run(
        &self,
        window: &EventWindow,
        cancel: &CancellationToken,
    ) -> Result<BankOutcome, EngineError> {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<(PatternType, Result<Vec<PatternCandidate>, String>)> =
            JoinSet::new();

        for detector in &self.detectors {
            if cancel.is_cancelled() {
                tasks.abort_all();
                return Err(EngineError::Cancelled);
            }
            let kind = detector.kind();
            let detector = detector.clone();
            let window = window.clone();
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return (kind, Err(format!("worker pool closed: {e}"))),
                };
                let result = run_blocking(permit, timeout, move || detector.detect(&window)).await;
                (kind, result)
            });
        }

        let mut outcome = BankOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            if cancel.is_cancelled() {
                tasks.abort_all();
                return Err(EngineError::Cancelled);
            }
            let (kind, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Detector task lost: {}", e);
                    continue;
                }
            };
            match result {
                Ok(candidates) => {
                    debug!(detector = %kind, count = candidates.len(), "Detector finished");
                    outcome.per_detector.insert(kind, candidates.len());
                    outcome.candidates.extend(candidates);
                }
                Err(message) => {
                    warn!(detector = %kind, "Detector failed, continuing without it: {}", message);
                    outcome.per_detector.insert(kind, 0);
                    outcome.failures.push(DetectorFailure {
                        detector: kind,
                        message,
                    });
                }
            }
        }

        outcome.candidates.sort_by(|a, b| {
            (a.pattern_type, &a.device_ids)
                .cmp(&(b.pattern_type, &b.device_ids))
                .then_with(|| b.raw_confidence.total_cmp(&a.raw_confidence))
        });
        outcome.failures.sort_by_key(|f| f.detector);
        Ok(outcome)
    }
}

/// Run `work` on the blocking pool. The permit moves into the blocking
/// closure: a timed-out detector keeps its worker slot until it returns.
async fn run_blocking<T, F>(
    permit: OwnedSemaphorePermit,
    timeout: Duration,
    work: F,
) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    });
    match tokio::time::timeout(timeout, handle).await {
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f64())),
        Ok(Err(join)) if join.is_panic() => Err("detector panicked".to_string()),
        Ok(Err(join)) => Err(format!("detector task aborted: {join}")),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::DetectorsConfig;
    use crate::patterns::detectors::test_support::*;

    fn motion_light_window() -> EventWindow {
        let mut events = Vec::new();
        for day in 0..20 {
            events.push(ev("binary_sensor.hall_motion", "hall", day, 7 * 60, "on"));
            events.push(ev_secs("light.hall", "hall", day, 7 * 60, 30, "on"));
        }
        window_of(events, 20)
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let cfg = DetectorsConfig {
            forest_trees: 0,
            ..Default::default()
        };
        let bank = DetectorBank::new(Detector::enabled(&cfg), 2, Duration::from_secs(10));
        let outcome = bank
            .run(&motion_light_window(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].detector, PatternType::Anomaly);
        assert!(outcome
            .candidates
            .iter()
            .any(|c| c.pattern_type == PatternType::CoOccurrence));
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let bank = DetectorBank::new(
            Detector::enabled(&DetectorsConfig::default()),
            4,
            Duration::from_secs(10),
        );
        let window = motion_light_window();
        let a = bank.run(&window, &CancellationToken::new()).await.unwrap();
        let b = bank.run(&window, &CancellationToken::new()).await.unwrap();
        assert_eq!(a.candidates, b.candidates);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let bank = DetectorBank::new(
            Detector::enabled(&DetectorsConfig::default()),
            1,
            Duration::from_secs(10),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bank.run(&motion_light_window(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_slow_detectors_time_out() {
        let mut events = Vec::new();
        for day in 0..30 {
            for room in 0..12 {
                let area = format!("room{room}");
                for visit in 0..6 {
                    let minute = 6 * 60 + visit * 120 + room;
                    events.push(ev(&format!("binary_sensor.motion_{room}"), &area, day, minute, "on"));
                    events.push(ev_secs(&format!("light.lamp_{room}"), &area, day, minute, 20, "on"));
                    events.push(ev(&format!("light.lamp_{room}"), &area, day, minute + 45, "off"));
                }
            }
        }
        let window = window_of(events, 30);
        let detectors = Detector::enabled(&DetectorsConfig::default());
        let bank = DetectorBank::new(detectors.clone(), 2, Duration::ZERO);
        let outcome = bank.run(&window, &CancellationToken::new()).await.unwrap();

        assert!(!outcome.failures.is_empty());
        assert!(outcome
            .failures
            .iter()
            .all(|f| f.message.starts_with("timed out")));
        // Timed-out detectors still report, with nothing found.
        assert_eq!(outcome.per_detector.len(), detectors.len());
        for failure in &outcome.failures {
            assert_eq!(outcome.per_detector.get(&failure.detector), Some(&0));
        }
    }

    #[tokio::test]
    async fn test_timed_out_work_keeps_its_slot() {
        let pool = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&pool).acquire_owned().await.unwrap();
        let result = run_blocking(permit, Duration::from_millis(10), || {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().starts_with("timed out"));
        assert_eq!(pool.available_permits(), 0);

        let _slot = tokio::time::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .expect("slot released once the work returns")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_blocking_reports_panics() {
        let pool = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&pool).acquire_owned().await.unwrap();
        let result: Result<(), String> =
            run_blocking(permit, Duration::from_secs(5), || panic!("boom")).await;
        assert_eq!(result.unwrap_err(), "detector panicked");
        assert_eq!(pool.available_permits(), 1);
    }
}
