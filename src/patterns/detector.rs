// src/patterns/detector.rs — Detector dispatch

use crate::core::types::{EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::detectors::*;

/// One configured detection algorithm. The set is closed; adding a kind
/// means adding a variant here and a `PatternType`.
#[derive(Debug, Clone)]
pub enum Detector {
    CoOccurrence(CoOccurrenceDetector),
    TimeOfDay(TimeOfDayDetector),
    Sequence(SequenceDetector),
    Contextual(ContextualDetector),
    RoomBased(RoomBasedDetector),
    Session(SessionDetector),
    Duration(DurationDetector),
    DayType(DayTypeDetector),
    Seasonal(SeasonalDetector),
    Anomaly(AnomalyDetector),
}

impl Detector {
    pub fn build(kind: PatternType, cfg: &DetectorsConfig) -> Self {
        match kind {
            PatternType::CoOccurrence => Self::CoOccurrence(CoOccurrenceDetector::from_config(cfg)),
            PatternType::TimeOfDay => Self::TimeOfDay(TimeOfDayDetector::from_config(cfg)),
            PatternType::Sequence => Self::Sequence(SequenceDetector::from_config(cfg)),
            PatternType::Contextual => Self::Contextual(ContextualDetector::from_config(cfg)),
            PatternType::RoomBased => Self::RoomBased(RoomBasedDetector::from_config(cfg)),
            PatternType::Session => Self::Session(SessionDetector::from_config(cfg)),
            PatternType::Duration => Self::Duration(DurationDetector::from_config(cfg)),
            PatternType::DayType => Self::DayType(DayTypeDetector::from_config(cfg)),
            PatternType::Seasonal => Self::Seasonal(SeasonalDetector::from_config(cfg)),
            PatternType::Anomaly => Self::Anomaly(AnomalyDetector::from_config(cfg)),
        }
    }

    /// Detectors enabled by config, in precedence order. An empty
    /// `enabled` list means every detector; unknown names are ignored.
    pub fn enabled(cfg: &DetectorsConfig) -> Vec<Self> {
        PatternType::ALL
            .iter()
            .filter(|kind| {
                cfg.enabled.is_empty() || cfg.enabled.iter().any(|name| name == kind.as_str())
            })
            .map(|kind| Self::build(*kind, cfg))
            .collect()
    }

    pub fn kind(&self) -> PatternType {
        match self {
            Self::CoOccurrence(_) => PatternType::CoOccurrence,
            Self::TimeOfDay(_) => PatternType::TimeOfDay,
            Self::Sequence(_) => PatternType::Sequence,
            Self::Contextual(_) => PatternType::Contextual,
            Self::RoomBased(_) => PatternType::RoomBased,
            Self::Session(_) => PatternType::Session,
            Self::Duration(_) => PatternType::Duration,
            Self::DayType(_) => PatternType::DayType,
            Self::Seasonal(_) => PatternType::Seasonal,
            Self::Anomaly(_) => PatternType::Anomaly,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Run detection over a window. Empty windows yield nothing.
    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::CoOccurrence(d) => d.detect(window),
            Self::TimeOfDay(d) => d.detect(window),
            Self::Sequence(d) => d.detect(window),
            Self::Contextual(d) => d.detect(window),
            Self::RoomBased(d) => d.detect(window),
            Self::Session(d) => d.detect(window),
            Self::Duration(d) => d.detect(window),
            Self::DayType(d) => d.detect(window),
            Self::Seasonal(d) => d.detect(window),
            Self::Anomaly(d) => d.detect(window),
        }
    }
}
