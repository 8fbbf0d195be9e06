// src/core/types.rs — Core domain types

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::infra::errors::EngineError;

/// A single device state change, as supplied by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_id: String,
    pub domain: String,
    pub device_id: String,
    #[serde(default)]
    pub area_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub state_from: Option<String>,
    pub state_to: String,
}

/// Direction of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

const UP_STATES: &[&str] = &[
    "on", "open", "opening", "unlocked", "unlocking", "detected", "home", "playing", "occupied",
    "active", "heat", "cool", "heat_cool", "auto", "dry", "fan_only", "cleaning", "triggered",
    "above_horizon",
];

const DOWN_STATES: &[&str] = &[
    "off", "closed", "closing", "locked", "locking", "clear", "away", "not_home", "idle",
    "paused", "standby", "docked", "disarmed", "unoccupied", "below_horizon",
];

impl Event {
    pub fn direction(&self) -> Direction {
        let state = self.state_to.to_ascii_lowercase();
        if UP_STATES.contains(&state.as_str()) {
            Direction::Up
        } else if DOWN_STATES.contains(&state.as_str()) {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }

    /// An "on-like" transition.
    pub fn is_activation(&self) -> bool {
        self.direction() == Direction::Up
            && self.state_from.as_deref().map(str::to_ascii_lowercase) != Some(self.state_to.to_ascii_lowercase())
    }
}

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn trailing(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - Duration::days(days as i64),
            end,
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }

    pub fn days(&self) -> f64 {
        ((self.end - self.start).num_seconds() as f64 / 86_400.0).max(0.0)
    }
}

/// An ordered, immutable batch of events shared read-only across detectors.
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub window: TimeWindow,
    pub events: Arc<[Event]>,
}

impl EventWindow {
    /// Validate and wrap a batch of events. Unsorted, out-of-window or
    /// identity-less events make the whole window malformed.
    pub fn new(window: TimeWindow, events: Vec<Event>) -> Result<Self, EngineError> {
        if window.end < window.start {
            return Err(EngineError::Input(format!(
                "window end {} precedes start {}",
                window.end, window.start
            )));
        }
        for (i, event) in events.iter().enumerate() {
            if event.entity_id.trim().is_empty() || event.device_id.trim().is_empty() {
                return Err(EngineError::Input(format!(
                    "event #{i} is missing an entity or device id"
                )));
            }
            if !window.contains(&event.timestamp) {
                return Err(EngineError::Input(format!(
                    "event #{i} ({}) at {} lies outside [{}, {})",
                    event.entity_id, event.timestamp, window.start, window.end
                )));
            }
            if i > 0 && events[i - 1].timestamp > event.timestamp {
                return Err(EngineError::Input(format!(
                    "events are not sorted by timestamp at #{i} ({})",
                    event.entity_id
                )));
            }
        }
        Ok(Self {
            window,
            events: events.into(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// The closed set of pattern kinds; each detector produces exactly one kind.
/// Declaration order doubles as precedence when detectors disagree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    CoOccurrence,
    TimeOfDay,
    Sequence,
    Contextual,
    RoomBased,
    Session,
    Duration,
    DayType,
    Seasonal,
    Anomaly,
}

impl PatternType {
    pub const ALL: [PatternType; 10] = [
        Self::CoOccurrence,
        Self::TimeOfDay,
        Self::Sequence,
        Self::Contextual,
        Self::RoomBased,
        Self::Session,
        Self::Duration,
        Self::DayType,
        Self::Seasonal,
        Self::Anomaly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoOccurrence => "co_occurrence",
            Self::TimeOfDay => "time_of_day",
            Self::Sequence => "sequence",
            Self::Contextual => "contextual",
            Self::RoomBased => "room_based",
            Self::Session => "session",
            Self::Duration => "duration",
            Self::DayType => "day_type",
            Self::Seasonal => "seasonal",
            Self::Anomaly => "anomaly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ephemeral, unvalidated detection output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub pattern_type: PatternType,
    pub device_ids: BTreeSet<String>,
    pub domains: BTreeSet<String>,
    pub window: TimeWindow,
    pub occurrence_times: BTreeSet<DateTime<Utc>>,
    pub raw_confidence: f64,
    pub metadata: BTreeMap<String, Value>,
    pub detector_source: PatternType,
    /// Detector kinds that found this device set; filled by the deduplicator.
    #[serde(default)]
    pub corroborated_by: BTreeSet<PatternType>,
}

impl PatternCandidate {
    pub fn new(pattern_type: PatternType, window: TimeWindow) -> Self {
        Self {
            pattern_type,
            device_ids: BTreeSet::new(),
            domains: BTreeSet::new(),
            window,
            occurrence_times: BTreeSet::new(),
            raw_confidence: 0.0,
            metadata: BTreeMap::new(),
            detector_source: pattern_type,
            corroborated_by: BTreeSet::from([pattern_type]),
        }
    }

    pub fn with_device(mut self, device_id: &str, domain: &str) -> Self {
        self.device_ids.insert(device_id.to_string());
        self.domains.insert(domain.to_string());
        self
    }

    pub fn with_occurrences(mut self, times: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.occurrence_times.extend(times);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.raw_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn occurrences(&self) -> usize {
        self.occurrence_times.len()
    }

    pub fn last_occurrence(&self) -> Option<DateTime<Utc>> {
        self.occurrence_times.iter().next_back().copied()
    }

    /// Stable id of the pattern this candidate would persist as.
    pub fn target_id(&self) -> String {
        pattern_id(self.pattern_type, &self.device_ids)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Active,
    NeedsReview,
    Deprecated,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::NeedsReview => "needs_review",
            Self::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "needs_review" => Some(Self::NeedsReview),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }
}

/// A persisted recurring device-interaction relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub pattern_type: PatternType,
    /// Sorted, unique.
    pub device_ids: Vec<String>,
    /// Occurrences inside the trailing window only.
    pub occurrences: u32,
    pub confidence: f64,
    pub quality_score: f64,
    pub status: LifecycleStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
    /// Per-day occurrence counts backing `occurrences`.
    #[serde(default)]
    pub occurrence_days: BTreeMap<NaiveDate, u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Pattern {
    /// Build a fresh, active pattern from a scored candidate.
    pub fn from_candidate(
        candidate: &PatternCandidate,
        quality_score: f64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let mut occurrence_days = BTreeMap::new();
        for ts in &candidate.occurrence_times {
            *occurrence_days.entry(ts.date_naive()).or_insert(0u32) += 1;
        }
        Self {
            id: candidate.target_id(),
            pattern_type: candidate.pattern_type,
            device_ids: candidate.device_ids.iter().cloned().collect(),
            occurrences: candidate.occurrences() as u32,
            confidence: candidate.raw_confidence,
            quality_score,
            status: LifecycleStatus::Active,
            first_seen: detected_at,
            last_seen: detected_at,
            deprecated_at: None,
            occurrence_days,
            metadata: candidate.metadata.clone(),
        }
    }

    /// Drop histogram days before `window_start` and recompute `occurrences`.
    pub fn trim_occurrences(&mut self, window_start: NaiveDate) -> bool {
        let before = self.occurrences;
        self.occurrence_days.retain(|day, _| *day >= window_start);
        self.occurrences = self.occurrence_days.values().sum();
        before != self.occurrences
    }

    pub fn involves(&self, device_id: &str) -> bool {
        self.device_ids.iter().any(|d| d == device_id)
    }
}

/// Stable pattern id: one persisted pattern per (type, sorted device ids).
pub fn pattern_id<'a>(
    pattern_type: PatternType,
    device_ids: impl IntoIterator<Item = &'a String>,
) -> String {
    let mut ids: Vec<&String> = device_ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    let joined = ids
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",");
    digest_id("pat", &format!("{}|{}", pattern_type.as_str(), joined))
}

/// Stable synergy id: one persisted synergy per (trigger, chain, type).
pub fn synergy_id(trigger: &str, action_chain: &[String], relationship: &str) -> String {
    digest_id(
        "syn",
        &format!("{trigger}|{}|{relationship}", action_chain.join(">")),
    )
}

fn digest_id(prefix: &str, key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{prefix}_{}", &hex::encode(digest)[..24])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Pattern,
    Synergy,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Synergy => "synergy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern" => Some(Self::Pattern),
            "synergy" => Some(Self::Synergy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Accept,
    Reject,
    Modify,
    Deploy,
    Disable,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Modify => "modify",
            Self::Deploy => "deploy",
            Self::Disable => "disable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            "modify" => Some(Self::Modify),
            "deploy" => Some(Self::Deploy),
            "disable" => Some(Self::Disable),
            _ => None,
        }
    }

    pub fn default_reward(&self) -> f64 {
        match self {
            Self::Accept | Self::Deploy => 1.0,
            Self::Modify => 0.5,
            Self::Disable => -0.5,
            Self::Reject => -1.0,
        }
    }
}

/// One entry of the append-only feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub target_id: String,
    pub target_type: TargetType,
    pub action: FeedbackAction,
    pub reward: f64,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn new(target_id: &str, target_type: TargetType, action: FeedbackAction) -> Self {
        Self {
            target_id: target_id.to_string(),
            target_type,
            action,
            reward: action.default_reward(),
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn accepted(&self) -> bool {
        self.reward > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(entity: &str, ts: DateTime<Utc>, to: &str) -> Event {
        Event {
            entity_id: entity.into(),
            domain: entity.split('.').next().unwrap_or("").into(),
            device_id: format!("dev_{entity}"),
            area_id: None,
            timestamp: ts,
            state_from: None,
            state_to: to.into(),
        }
    }

    #[test]
    fn test_direction_classification() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(event("light.a", t, "on").direction(), Direction::Up);
        assert_eq!(event("lock.a", t, "locked").direction(), Direction::Down);
        assert_eq!(event("sensor.t", t, "21.5").direction(), Direction::Neutral);
        assert!(event("light.a", t, "ON").is_activation());
        assert!(!event("light.a", t, "off").is_activation());
    }

    #[test]
    fn test_event_window_rejects_unsorted() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::new(t, t + Duration::days(1));
        let events = vec![
            event("light.a", t + Duration::hours(2), "on"),
            event("light.a", t + Duration::hours(1), "off"),
        ];
        assert!(matches!(
            EventWindow::new(window, events),
            Err(EngineError::Input(_))
        ));
    }

    #[test]
    fn test_event_window_rejects_out_of_range() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::new(t, t + Duration::days(1));
        let events = vec![event("light.a", t + Duration::days(2), "on")];
        assert!(EventWindow::new(window, events).is_err());
    }

    #[test]
    fn test_empty_window_is_valid() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let window = EventWindow::new(TimeWindow::new(t, t + Duration::days(1)), vec![]).unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn test_pattern_id_order_independent() {
        let a = vec!["b".to_string(), "a".to_string()];
        let b = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            pattern_id(PatternType::CoOccurrence, &a),
            pattern_id(PatternType::CoOccurrence, &b)
        );
        assert_ne!(
            pattern_id(PatternType::CoOccurrence, &a),
            pattern_id(PatternType::Sequence, &a)
        );
    }

    #[test]
    fn test_trim_occurrences() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let window = TimeWindow::new(t, t + Duration::days(10));
        let candidate = PatternCandidate::new(PatternType::CoOccurrence, window)
            .with_device("a", "light")
            .with_occurrences((0..10).map(|d| t + Duration::days(d)));
        let mut pattern = Pattern::from_candidate(&candidate, 0.8, t + Duration::days(10));
        assert_eq!(pattern.occurrences, 10);
        assert!(pattern.trim_occurrences((t + Duration::days(5)).date_naive()));
        assert_eq!(pattern.occurrences, 5);
        assert!(!pattern.trim_occurrences((t + Duration::days(5)).date_naive()));
    }

    #[test]
    fn test_feedback_default_rewards() {
        let f = Feedback::new("p1", TargetType::Pattern, FeedbackAction::Reject);
        assert!(!f.accepted());
        assert!((f.reward + 1.0).abs() < f64::EPSILON);
        assert!(Feedback::new("p1", TargetType::Pattern, FeedbackAction::Deploy).accepted());
        assert_eq!(FeedbackAction::parse("modify"), Some(FeedbackAction::Modify));
        assert_eq!(PatternType::parse("day_type"), Some(PatternType::DayType));
    }
}
