// tests/synergy_test.rs — Integration test: synergy detection with and without context

use chrono::{DateTime, Duration, TimeZone, Utc};

use homeminer::core::types::Event;
use homeminer::infra::config::SynergyConfig;
use homeminer::synergy::context::{
    CalendarContext, ContextSnapshot, EnergyContext, PriceLevel, WeatherContext,
};
use homeminer::synergy::relationship::RelationshipType;
use homeminer::synergy::{Synergy, SynergyDetector};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
}

fn event(entity: &str, ts: DateTime<Utc>, to: &str) -> Event {
    let domain = entity.split('.').next().unwrap_or_default();
    Event {
        entity_id: entity.into(),
        domain: domain.into(),
        device_id: format!("dev_{}", entity.replace('.', "_")),
        area_id: None,
        timestamp: ts,
        state_from: None,
        state_to: to.into(),
    }
}

/// `days` repetitions of trigger -> target with a fixed delay.
fn pairs(
    trigger: (&str, &str),
    target: (&str, &str),
    delay_secs: i64,
    days: i64,
) -> Vec<Event> {
    let mut events = Vec::new();
    for day in 0..days {
        let ts = t0() + Duration::days(day) + Duration::hours(14);
        events.push(event(trigger.0, ts, trigger.1));
        events.push(event(target.0, ts + Duration::seconds(delay_secs), target.1));
    }
    events
}

fn detector() -> SynergyDetector {
    let actionable: Vec<String> = ["light", "lock", "climate", "fan"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    SynergyDetector::new(SynergyConfig::default(), &actionable)
}

fn only_pair(synergies: &[Synergy]) -> &Synergy {
    assert_eq!(synergies.len(), 1, "expected exactly one synergy");
    &synergies[0]
}

fn as_of() -> DateTime<Utc> {
    t0() + Duration::days(10)
}

#[test]
fn test_open_window_turns_climate_off() {
    let events = pairs(
        ("binary_sensor.bedroom_window", "on"),
        ("climate.bedroom", "off"),
        45,
        7,
    );
    let outcome = detector().detect(&events, &[], None, as_of());
    let synergy = only_pair(&outcome.synergies);
    assert_eq!(synergy.relationship_type, RelationshipType::WindowToClimate);
    assert_eq!(synergy.action_chain, ["binary_sensor.bedroom_window", "climate.bedroom"]);
    assert!(synergy.benefit_score > 0.0 && synergy.benefit_score <= 1.0);
    assert_eq!(synergy.first_seen, as_of());
}

#[test]
fn test_weather_and_price_boost_is_capped() {
    let events = pairs(
        ("binary_sensor.bedroom_window", "on"),
        ("climate.bedroom", "off"),
        45,
        7,
    );
    let hot_and_expensive = ContextSnapshot {
        weather: Some(WeatherContext {
            outdoor_temp_c: 34.0,
            condition: None,
        }),
        energy: Some(EnergyContext {
            price_level: PriceLevel::High,
        }),
        calendar: None,
    };
    let plain = detector().detect(&events, &[], None, as_of());
    let boosted = detector().detect(&events, &[], Some(&hot_and_expensive), as_of());

    let plain = only_pair(&plain.synergies);
    let boosted = only_pair(&boosted.synergies);
    assert_eq!(plain.id, boosted.id);
    // weather 0.1 + energy 0.1 hits the 0.2 cap exactly.
    assert!((boosted.benefit_score / plain.benefit_score - 1.2).abs() < 1e-9);
    let breakdown = &boosted.explanation.breakdown;
    assert_eq!(breakdown.get("context_multiplier"), Some(&1.2));
    assert!(breakdown.contains_key("context_weather"));
    assert!(breakdown.contains_key("context_energy"));
}

#[test]
fn test_cheap_power_damps_lighting() {
    let events = pairs(
        ("binary_sensor.hall_motion", "on"),
        ("light.hall", "on"),
        10,
        6,
    );
    let cheap = ContextSnapshot {
        energy: Some(EnergyContext {
            price_level: PriceLevel::Low,
        }),
        ..Default::default()
    };
    let plain = detector().detect(&events, &[], None, as_of());
    let damped = detector().detect(&events, &[], Some(&cheap), as_of());
    let plain = only_pair(&plain.synergies);
    let damped = only_pair(&damped.synergies);
    assert_eq!(plain.relationship_type, RelationshipType::MotionToLight);
    assert!(damped.benefit_score < plain.benefit_score);
    assert!(damped.benefit_score >= plain.benefit_score * 0.8 - 1e-9);
}

#[test]
fn test_away_calendar_never_pushes_benefit_past_one() {
    let events = pairs(
        ("binary_sensor.front_door", "off"),
        ("lock.front", "locked"),
        20,
        8,
    );
    let away = ContextSnapshot {
        calendar: Some(CalendarContext {
            occupants_away: true,
        }),
        ..Default::default()
    };
    let outcome = detector().detect(&events, &[], Some(&away), as_of());
    let synergy = only_pair(&outcome.synergies);
    assert_eq!(synergy.relationship_type, RelationshipType::DoorToLock);
    assert!(synergy.benefit_score <= 1.0);
}

#[test]
fn test_target_outside_window_is_not_linked() {
    let events = pairs(
        ("binary_sensor.hall_motion", "on"),
        ("light.hall", "on"),
        SynergyConfig::default().window_secs + 60,
        10,
    );
    let outcome = detector().detect(&events, &[], None, as_of());
    assert_eq!(outcome.edges_considered, 0);
    assert!(outcome.synergies.is_empty());
}

#[test]
fn test_non_actionable_target_is_ignored() {
    let events = pairs(
        ("binary_sensor.hall_motion", "on"),
        ("switch.hall", "on"),
        10,
        10,
    );
    let outcome = detector().detect(&events, &[], None, as_of());
    assert!(outcome.synergies.is_empty());
}

#[test]
fn test_detection_is_deterministic() {
    let mut events = pairs(
        ("binary_sensor.hall_motion", "on"),
        ("light.hall", "on"),
        10,
        6,
    );
    events.extend(pairs(
        ("binary_sensor.front_door", "off"),
        ("lock.front", "locked"),
        20,
        6,
    ));
    events.sort_by_key(|e| e.timestamp);

    let first = detector().detect(&events, &[], None, as_of());
    let second = detector().detect(&events, &[], None, as_of());
    assert_eq!(first.synergies, second.synergies);
    assert!(first
        .synergies
        .windows(2)
        .all(|w| w[0].benefit_score >= w[1].benefit_score));
}
