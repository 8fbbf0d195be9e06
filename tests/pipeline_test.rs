// tests/pipeline_test.rs — Integration test: full analysis runs through the engine

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use homeminer::core::engine::Engine;
use homeminer::core::history::{RunRecord, RunStatus};
use homeminer::core::scheduler::RunRequest;
use homeminer::core::types::{Event, Feedback, LifecycleStatus, Pattern, PatternType};
use homeminer::evaluator::drift::BaselineDistribution;
use homeminer::evaluator::weights::EnsembleWeights;
use homeminer::infra::config::Config;
use homeminer::infra::errors::EngineError;
use homeminer::memory::lifecycle::LifecyclePlan;
use homeminer::memory::{
    CalibrationHistory, CommitSummary, PatternQuery, Persistence, RunCommit, SqlitePersistence,
    SynergyQuery,
};
use homeminer::provider::{ContextProvider, EventWindowProvider, StaticContext, StaticEventSource};
use homeminer::synergy::context::{ContextSnapshot, EnergyContext, PriceLevel};
use homeminer::synergy::relationship::RelationshipType;
use homeminer::synergy::Synergy;
use pretty_assertions::assert_eq;

const SLOTS: i64 = 950;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn as_of() -> DateTime<Utc> {
    t0() + Duration::days(30)
}

fn event(entity: &str, device: &str, area: &str, ts: DateTime<Utc>, from: &str, to: &str) -> Event {
    Event {
        entity_id: entity.into(),
        domain: entity.split('.').next().unwrap_or_default().into(),
        device_id: device.into(),
        area_id: Some(area.into()),
        timestamp: ts,
        state_from: Some(from.into()),
        state_to: to.into(),
    }
}

/// About 1,000 events over 30 days: a hallway motion -> light pair 50 times,
/// a back door -> porch switch pair only 3 times, and temperature noise.
fn home_events() -> Vec<Event> {
    let mut events = Vec::new();
    let mut weak = 0;
    for i in 0..SLOTS {
        let ts = t0() + Duration::minutes(45 * i + 1);
        if i % 19 == 7 {
            events.push(event(
                "binary_sensor.hallway_motion",
                "dev_motion",
                "hallway",
                ts,
                "off",
                "on",
            ));
            events.push(event(
                "light.hallway",
                "dev_light",
                "hallway",
                ts + Duration::seconds(30),
                "off",
                "on",
            ));
        } else if i % 97 == 50 && weak < 3 {
            weak += 1;
            events.push(event("binary_sensor.back_door", "dev_back_door", "porch", ts, "off", "on"));
            events.push(event(
                "switch.porch",
                "dev_porch",
                "porch",
                ts + Duration::seconds(40),
                "off",
                "on",
            ));
        } else if i % 311 == 100 {
            // quiet slot
        } else {
            let reading = format!("{:.1}", 19.0 + (i % 7) as f64 * 0.5);
            events.push(event(
                "sensor.temperature",
                &format!("dev_temp_{}", i % 20),
                "living_room",
                ts,
                "20.0",
                &reading,
            ));
        }
    }
    events
}

async fn engine_with(events: Arc<dyn EventWindowProvider>) -> (Engine, Arc<SqlitePersistence>) {
    let persistence = Arc::new(SqlitePersistence::in_memory().unwrap());
    let engine = Engine::open(
        Config::default(),
        events,
        persistence.clone() as Arc<dyn Persistence>,
        None,
    )
    .await
    .unwrap();
    (engine, persistence)
}

/// An engine over `events` sharing an existing store, as a restarted process would.
async fn reopen(events: Vec<Event>, persistence: &Arc<SqlitePersistence>, config: Config) -> Engine {
    Engine::open(
        config,
        Arc::new(StaticEventSource::new(events)),
        persistence.clone() as Arc<dyn Persistence>,
        None,
    )
    .await
    .unwrap()
}

async fn home_engine() -> (Engine, Arc<SqlitePersistence>) {
    engine_with(Arc::new(StaticEventSource::new(home_events()))).await
}

#[test]
fn test_dataset_shape() {
    let events = home_events();
    assert!((950..=1_050).contains(&events.len()));
    let motion = events
        .iter()
        .filter(|e| e.entity_id == "binary_sensor.hallway_motion")
        .count();
    assert_eq!(motion, 50);
    assert!(events.iter().all(|e| e.timestamp >= t0() && e.timestamp < as_of()));
}

#[tokio::test]
async fn test_end_to_end_finds_single_co_occurrence() {
    let (engine, persistence) = home_engine().await;
    let report = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.record.status, RunStatus::Succeeded);
    assert!(report.record.failures.is_empty());

    let co: Vec<_> = report
        .patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::CoOccurrence)
        .collect();
    assert_eq!(co.len(), 1);
    let pattern = co[0];
    assert_eq!(pattern.device_ids, vec!["dev_light".to_string(), "dev_motion".to_string()]);
    assert_eq!(pattern.occurrences, 50);
    assert!(pattern.quality_score >= 0.5);
    assert_eq!(pattern.status, LifecycleStatus::Active);

    // The weak pair never clears the occurrence floor.
    let stored = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    assert!(stored
        .iter()
        .all(|p| !p.involves("dev_back_door") && !p.involves("dev_porch")));
    assert!(stored.iter().all(|p| p.quality_score >= 0.5));
    assert!(stored.len() <= Config::default().analysis.top_n);

    // The same pair surfaces as a motion -> light synergy backed by the pattern.
    let synergy = report
        .synergies
        .iter()
        .find(|s| s.trigger_entity == "binary_sensor.hallway_motion" && s.action_chain.len() == 2)
        .expect("motion -> light synergy");
    assert_eq!(synergy.relationship_type, RelationshipType::MotionToLight);
    assert!(synergy.supporting_pattern_ids.contains(&pattern.id));

    let runs = persistence.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.record.run_id);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (engine, persistence) = home_engine().await;
    let first = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    let patterns_before = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    let synergies_before = persistence.get_synergies(&Default::default()).await.unwrap();

    let second = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.record.status, RunStatus::Succeeded);
    assert_eq!(second.commit.patterns_upserted, 0);

    // Nothing changed in storage, yet consumers still get the full list.
    let ids = |patterns: &[Pattern]| patterns.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
    assert!(!first.patterns.is_empty());
    assert_eq!(ids(&second.patterns[..]), ids(&first.patterns[..]));
    assert_eq!(
        second.synergies.iter().map(|s| &s.id).collect::<Vec<_>>(),
        first.synergies.iter().map(|s| &s.id).collect::<Vec<_>>()
    );
    assert!(second.patterns.iter().all(|p| patterns_before.contains(p)));

    let patterns_after = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    let synergies_after = persistence.get_synergies(&Default::default()).await.unwrap();
    assert_eq!(patterns_after, patterns_before);
    assert_eq!(synergies_after, synergies_before);
}

#[tokio::test]
async fn test_occurrences_stay_bounded_as_time_passes() {
    let (engine, persistence) = home_engine().await;
    engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    let before = persistence
        .get_patterns(&PatternQuery {
            pattern_type: Some(PatternType::CoOccurrence),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(before[0].occurrences, 50);

    // Forty days later the window holds no events at all.
    let later = as_of() + Duration::days(40);
    let report = engine
        .analyze(RunRequest::full(later), CancellationToken::new())
        .await
        .unwrap();
    assert!(report.patterns.is_empty());

    let after = persistence
        .get_patterns(&PatternQuery {
            pattern_type: Some(PatternType::CoOccurrence),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(after.len(), 1);
    assert!(after[0].occurrences < before[0].occurrences);
    assert_eq!(after[0].occurrences, 0);
    assert_eq!(after[0].status, LifecycleStatus::Deprecated);
    assert_eq!(after[0].id, before[0].id);
}

#[tokio::test]
async fn test_incremental_without_new_events_is_skipped() {
    let (engine, persistence) = home_engine().await;
    engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    let before = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();

    let report = engine
        .analyze(RunRequest::incremental(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.record.status, RunStatus::Skipped);
    assert!(report.patterns.is_empty());

    let after = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(persistence.list_runs(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing() {
    let (engine, persistence) = home_engine().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .analyze(RunRequest::full(as_of()), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::Cancelled));

    assert!(persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap()
        .is_empty());
    assert!(persistence.watermark().await.unwrap().is_none());
    let runs = persistence.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Cancelled);
    assert_eq!(runs[0].run_id, err.run_id);

    let recent = engine.scheduler().recent_runs(5);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, RunStatus::Cancelled);
}

/// Delays every fetch so a second run can overlap the first.
struct SlowSource {
    inner: StaticEventSource,
    delay: std::time::Duration,
}

#[async_trait]
impl EventWindowProvider for SlowSource {
    fn id(&self) -> &str {
        "slow"
    }

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_events(start, end).await
    }
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let source = SlowSource {
        inner: StaticEventSource::new(home_events()),
        delay: std::time::Duration::from_millis(200),
    };
    let (engine, _) = engine_with(Arc::new(source)).await;

    let (first, second) = tokio::join!(
        engine.analyze(RunRequest::full(as_of()), CancellationToken::new()),
        engine.analyze(RunRequest::full(as_of()), CancellationToken::new()),
    );
    assert!(first.is_ok());
    assert!(matches!(second.unwrap_err().error, EngineError::RunInProgress));
    assert!(!engine.scheduler().is_running());
}

struct BrokenContext;

#[async_trait]
impl ContextProvider for BrokenContext {
    fn id(&self) -> &str {
        "broken"
    }

    async fn snapshot(&self, _at: DateTime<Utc>) -> Result<ContextSnapshot, EngineError> {
        Err(EngineError::EnrichmentUnavailable {
            source_name: "broken".into(),
            message: "connection refused".into(),
        })
    }
}

#[tokio::test]
async fn test_missing_context_degrades_gracefully() {
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::in_memory().unwrap());
    let engine = Engine::open(
        Config::default(),
        Arc::new(StaticEventSource::new(home_events())),
        persistence,
        Some(Arc::new(BrokenContext)),
    )
    .await
    .unwrap();

    let report = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.record.status, RunStatus::Succeeded);
    assert!(report.record.enrichment_degraded);
    assert!(!report.synergies.is_empty());
}

#[tokio::test]
async fn test_context_snapshot_reaches_synergy_scoring() {
    let cheap = ContextSnapshot {
        energy: Some(EnergyContext {
            price_level: PriceLevel::Low,
        }),
        ..Default::default()
    };
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::in_memory().unwrap());
    let engine = Engine::open(
        Config::default(),
        Arc::new(StaticEventSource::new(home_events())),
        persistence,
        Some(Arc::new(StaticContext::new(cheap))),
    )
    .await
    .unwrap();
    let (plain_engine, _) = home_engine().await;

    let boosted = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    let plain = plain_engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert!(!boosted.record.enrichment_degraded);

    let motion_light = |report: &homeminer::core::RunReport| {
        report
            .synergies
            .iter()
            .find(|s| s.relationship_type == RelationshipType::MotionToLight)
            .map(|s| s.benefit_score)
            .expect("motion -> light synergy")
    };
    assert!(motion_light(&boosted) < motion_light(&plain));
}

#[tokio::test]
async fn test_standalone_lifecycle_pass_deprecates_stale_items() {
    let (engine, persistence) = home_engine().await;
    engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();

    let report = engine
        .run_lifecycle(as_of() + Duration::days(31))
        .await
        .unwrap();
    assert!(report.deprecated > 0);
    let active = persistence
        .get_active_patterns(&PatternQuery::default())
        .await
        .unwrap();
    assert!(active.is_empty());

    // Running the same pass again changes nothing.
    let again = engine
        .run_lifecycle(as_of() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(again.deprecated, 0);
}

/// A motion -> light pair in `room`, once a day from day 2 to day 27, two hours apart per room.
fn room_pair(room: usize) -> Vec<Event> {
    let area = format!("room_{room}");
    let motion = format!("binary_sensor.motion_{room}");
    let light = format!("light.lamp_{room}");
    let mut events = Vec::new();
    for day in 2..28 {
        let ts = t0() + Duration::days(day) + Duration::hours(6 + 2 * room as i64);
        events.push(event(&motion, &format!("dev_motion_{room}"), &area, ts, "off", "on"));
        events.push(event(
            &light,
            &format!("dev_lamp_{room}"),
            &area,
            ts + Duration::seconds(20),
            "off",
            "on",
        ));
    }
    events
}

#[tokio::test]
async fn test_suggestions_never_exceed_top_n() {
    let mut config = Config::default();
    config.analysis.top_n = 1;
    config.synergy.top_n = 1;
    let persistence = Arc::new(SqlitePersistence::in_memory().unwrap());

    let first = reopen(room_pair(0), &persistence, config.clone())
        .await
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.patterns.len(), 1);
    let persisted = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();

    // Four more rooms show the same habit; the earlier find is still there.
    let events: Vec<Event> = (0..5).flat_map(room_pair).collect();
    let later = as_of() + Duration::days(1);
    let second = reopen(events, &persistence, config)
        .await
        .analyze(RunRequest::full(later), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.patterns.len(), 1);
    assert!(second.synergies.len() <= 1);
    assert_eq!(second.record.stages.persisted_patterns, 1);
    assert!(second.record.stages.above_threshold > 1);

    let stored = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    assert!(stored.len() <= persisted.len() + 1);
    // Earlier finds are refreshed even when they are not suggested again.
    for old in &persisted {
        let now = stored.iter().find(|p| p.id == old.id).expect("still persisted");
        assert_eq!(now.status, LifecycleStatus::Active);
        assert_eq!(now.last_seen, later);
    }
}

#[tokio::test]
async fn test_incremental_run_only_touches_devices_with_new_events() {
    let persistence = Arc::new(SqlitePersistence::in_memory().unwrap());
    let mut events = home_events();
    events.extend(room_pair(1));
    reopen(events.clone(), &persistence, Config::default())
        .await
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    let before = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    assert!(before.iter().any(|p| p.involves("dev_motion_1")));

    // Only the hallway pair fires again after the watermark.
    let fresh = as_of() + Duration::hours(2);
    events.push(event("binary_sensor.hallway_motion", "dev_motion", "hallway", fresh, "off", "on"));
    events.push(event(
        "light.hallway",
        "dev_light",
        "hallway",
        fresh + Duration::seconds(30),
        "off",
        "on",
    ));
    let later = as_of() + Duration::days(1);
    let report = reopen(events, &persistence, Config::default())
        .await
        .analyze(RunRequest::incremental(later), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.record.status, RunStatus::Succeeded);
    assert!(!report.patterns.is_empty());
    assert!(report
        .patterns
        .iter()
        .all(|p| p.involves("dev_motion") || p.involves("dev_light")));
    assert!(report.synergies.iter().all(|s| s
        .action_chain
        .iter()
        .any(|e| e == "binary_sensor.hallway_motion" || e == "light.hallway")));
    assert_eq!(persistence.watermark().await.unwrap(), Some(fresh + Duration::seconds(30)));

    let after = persistence
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap();
    let hallway = after
        .iter()
        .find(|p| p.pattern_type == PatternType::CoOccurrence && p.involves("dev_motion"))
        .expect("hallway pair");
    assert_eq!(hallway.last_seen, later);
    assert_eq!(hallway.status, LifecycleStatus::Active);
    // Untouched devices were not re-scored.
    let untouched = before
        .iter()
        .filter(|p| !p.involves("dev_motion") && !p.involves("dev_light"));
    for old in untouched {
        let now = after.iter().find(|p| p.id == old.id).expect("still persisted");
        assert_eq!(now.last_seen, old.last_seen);
    }
}

/// Storage whose run commit always fails; everything else is real.
struct FailingCommit {
    inner: SqlitePersistence,
}

#[async_trait]
impl Persistence for FailingCommit {
    async fn upsert_patterns(&self, patterns: &[Pattern]) -> Result<usize, EngineError> {
        self.inner.upsert_patterns(patterns).await
    }
    async fn upsert_synergies(&self, synergies: &[Synergy]) -> Result<usize, EngineError> {
        self.inner.upsert_synergies(synergies).await
    }
    async fn get_active_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        self.inner.get_active_patterns(query).await
    }
    async fn get_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        self.inner.get_patterns(query).await
    }
    async fn get_synergies(&self, query: &SynergyQuery) -> Result<Vec<Synergy>, EngineError> {
        self.inner.get_synergies(query).await
    }
    async fn record_feedback(&self, feedback: &Feedback) -> Result<(), EngineError> {
        self.inner.record_feedback(feedback).await
    }
    async fn calibration_history(&self, limit: usize) -> Result<CalibrationHistory, EngineError> {
        self.inner.calibration_history(limit).await
    }
    async fn commit_run(&self, _commit: &RunCommit) -> Result<CommitSummary, EngineError> {
        Err(EngineError::Persistence {
            message: "disk full".into(),
            retriable: false,
        })
    }
    async fn apply_lifecycle(&self, plan: &LifecyclePlan) -> Result<CommitSummary, EngineError> {
        self.inner.apply_lifecycle(plan).await
    }
    async fn load_weights(&self) -> Result<Option<EnsembleWeights>, EngineError> {
        self.inner.load_weights().await
    }
    async fn save_weights(&self, weights: &EnsembleWeights) -> Result<(), EngineError> {
        self.inner.save_weights(weights).await
    }
    async fn load_baseline(&self) -> Result<Option<BaselineDistribution>, EngineError> {
        self.inner.load_baseline().await
    }
    async fn save_baseline(&self, baseline: &BaselineDistribution) -> Result<(), EngineError> {
        self.inner.save_baseline(baseline).await
    }
    async fn recent_composites(&self, limit: usize) -> Result<Vec<f64>, EngineError> {
        self.inner.recent_composites(limit).await
    }
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.inner.watermark().await
    }
    async fn record_run(&self, run: &RunRecord) -> Result<(), EngineError> {
        self.inner.record_run(run).await
    }
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError> {
        self.inner.list_runs(limit).await
    }
}

#[tokio::test]
async fn test_failed_commit_fails_the_run_and_writes_nothing() {
    let inner = SqlitePersistence::in_memory().unwrap();
    let engine = Engine::open(
        Config::default(),
        Arc::new(StaticEventSource::new(home_events())),
        Arc::new(FailingCommit {
            inner: inner.clone(),
        }),
        None,
    )
    .await
    .unwrap();

    let err = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::Persistence { .. }));

    assert!(inner
        .get_patterns(&PatternQuery::default())
        .await
        .unwrap()
        .is_empty());
    assert!(inner
        .get_synergies(&SynergyQuery::default())
        .await
        .unwrap()
        .is_empty());
    assert!(inner.watermark().await.unwrap().is_none());
    assert!(inner.recent_composites(10).await.unwrap().is_empty());

    let runs = inner.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].run_id, err.run_id);
    let recent = engine.scheduler().recent_runs(1);
    assert_eq!(recent[0].status, RunStatus::Failed);
}
