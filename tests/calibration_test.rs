// tests/calibration_test.rs — Integration test: feedback, recalibration and drift through the engine

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use homeminer::core::engine::Engine;
use homeminer::core::scheduler::RunRequest;
use homeminer::core::types::{Event, Feedback, FeedbackAction, Pattern, TargetType};
use homeminer::infra::config::Config;
use homeminer::infra::errors::EngineError;
use homeminer::memory::{Persistence, SqlitePersistence};
use homeminer::provider::StaticEventSource;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn as_of() -> DateTime<Utc> {
    t0() + Duration::days(30)
}

fn event(entity: &str, device: &str, ts: DateTime<Utc>) -> Event {
    Event {
        entity_id: entity.into(),
        domain: entity.split('.').next().unwrap_or_default().into(),
        device_id: device.into(),
        area_id: Some("kitchen".into()),
        timestamp: ts,
        state_from: Some("off".into()),
        state_to: "on".into(),
    }
}

/// A kitchen motion -> light pair every evening for 28 days.
fn events() -> Vec<Event> {
    let mut out = Vec::new();
    for day in 0..28 {
        let ts = t0() + Duration::days(day) + Duration::hours(18) + Duration::minutes(day * 7);
        out.push(event("binary_sensor.kitchen_motion", "dev_kitchen_motion", ts));
        out.push(event("light.kitchen", "dev_kitchen_light", ts + Duration::seconds(20)));
    }
    out
}

async fn engine_on(persistence: Arc<dyn Persistence>) -> Engine {
    Engine::open(
        Config::default(),
        Arc::new(StaticEventSource::new(events())),
        persistence,
        None,
    )
    .await
    .unwrap()
}

async fn analyzed() -> (Engine, Arc<dyn Persistence>, Vec<Pattern>) {
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::in_memory().unwrap());
    let engine = engine_on(Arc::clone(&persistence)).await;
    let report = engine
        .analyze(RunRequest::full(as_of()), CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.patterns.is_empty());
    (engine, persistence, report.patterns)
}

fn feedback(target: &str, action: FeedbackAction, minute: i64) -> Feedback {
    Feedback::new(target, TargetType::Pattern, action).at(as_of() + Duration::minutes(minute))
}

#[tokio::test]
async fn test_recalibrate_without_enough_feedback_is_a_no_op() {
    let (engine, persistence, patterns) = analyzed().await;
    let version = engine.weights().version;

    for i in 0..5 {
        assert!(engine
            .submit_feedback(&feedback(&patterns[0].id, FeedbackAction::Accept, i))
            .await
            .unwrap());
    }
    let err = engine.recalibrate().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::CalibrationDataInsufficient {
            samples: 5,
            required: 20
        }
    ));
    assert_eq!(engine.weights().version, version);
    assert!(persistence.load_weights().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unscored_feedback_is_logged_but_unused() {
    let (engine, persistence, _) = analyzed().await;
    let used = engine
        .submit_feedback(&feedback("pat_000000000000000000000000", FeedbackAction::Reject, 0))
        .await
        .unwrap();
    assert!(!used);

    let history = persistence.calibration_history(10).await.unwrap();
    assert_eq!(history.feedback.len(), 1);
    assert!(history.scores.is_empty());
    assert_eq!(engine.tier_report().high.total + engine.tier_report().medium.total, 0);
}

#[tokio::test]
async fn test_recalibration_stays_bounded_and_persists() {
    let (engine, persistence, patterns) = analyzed().await;
    let before = engine.weights();
    let config = Config::default().calibration;

    for i in 0..24 {
        let action = if i % 4 == 0 {
            FeedbackAction::Reject
        } else {
            FeedbackAction::Accept
        };
        let target = &patterns[i as usize % patterns.len()].id;
        assert!(engine.submit_feedback(&feedback(target, action, i)).await.unwrap());
    }

    let after = engine.recalibrate().await.unwrap();
    assert_eq!(after.version, before.version + 1);
    assert!(after.is_valid());

    let components = after.components.as_array();
    let models = after.models.as_array();
    assert!((components.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!((models.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(components.iter().all(|w| *w >= config.min_weight - 1e-12));
    assert!(models.iter().all(|w| *w >= config.min_weight - 1e-12));

    // No single weight moves further than the step cap plus renormalization slack.
    for (old, new) in before.models.as_array().iter().zip(models) {
        assert!((old - new).abs() <= 2.0 * config.max_step + 1e-9);
    }

    let stored = persistence.load_weights().await.unwrap().unwrap();
    assert_eq!(stored.version, after.version);
    assert_eq!(engine.weights().version, after.version);
}

#[tokio::test]
async fn test_fresh_engine_restores_weights_and_samples() {
    let (engine, persistence, patterns) = analyzed().await;
    for i in 0..20 {
        engine
            .submit_feedback(&feedback(&patterns[0].id, FeedbackAction::Accept, i))
            .await
            .unwrap();
    }
    let weights = engine.recalibrate().await.unwrap();
    drop(engine);

    let reopened = engine_on(persistence).await;
    assert_eq!(reopened.weights().version, weights.version);
    let tiers = reopened.tier_report();
    assert_eq!(tiers.high.total + tiers.medium.total + tiers.low.total, 20);
    assert_eq!(tiers.high.accepted + tiers.medium.accepted + tiers.low.accepted, 20);
}

#[tokio::test]
async fn test_baseline_requires_scores() {
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::in_memory().unwrap());
    let engine = engine_on(persistence).await;
    assert!(matches!(
        engine.capture_baseline().await.unwrap_err(),
        EngineError::Input(_)
    ));
}

#[tokio::test]
async fn test_drift_against_own_baseline_is_stable() {
    let (engine, persistence, _) = analyzed().await;
    let baseline = engine.capture_baseline().await.unwrap();
    assert!(baseline.count > 0);
    assert!(persistence.load_baseline().await.unwrap().is_some());

    let report = engine.check_drift().await.unwrap();
    assert!(!report.drifted);
    assert_eq!(report.sample_count, baseline.count);
}
