// src/synergy/relationship.rs — The fixed relationship taxonomy and its signatures

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::patterns::activity::DeviceKind;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    MotionToLight,
    MotionToClimate,
    DoorToLight,
    DoorToLock,
    DoorToAlarm,
    WindowToClimate,
    PresenceToLight,
    PresenceToClimate,
    PresenceToLock,
    TemperatureToClimate,
    HumidityToFan,
    LightToMedia,
    MediaToLight,
    SwitchToLight,
    LightToLight,
    #[default]
    GenericSequence,
}

/// How the target's direction should relate to the trigger's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Agreement {
    Same(f64),
    Opposite(f64),
    Any,
}

/// Domain-pair signature with the timing an edge must show to earn the type.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub relationship: RelationshipType,
    pub from: DeviceKind,
    pub to: DeviceKind,
    pub agreement: Agreement,
    pub max_median_delay_secs: f64,
    pub prior: f64,
}

const fn sig(
    relationship: RelationshipType,
    from: DeviceKind,
    to: DeviceKind,
    agreement: Agreement,
    max_median_delay_secs: f64,
    prior: f64,
) -> Signature {
    Signature {
        relationship,
        from,
        to,
        agreement,
        max_median_delay_secs,
        prior,
    }
}

use Agreement::*;
use DeviceKind as K;
use RelationshipType as R;

pub const SIGNATURES: &[Signature] = &[
    sig(R::MotionToLight, K::Motion, K::Light, Same(0.6), 60.0, 0.9),
    sig(R::MotionToClimate, K::Motion, K::Climate, Same(0.5), 300.0, 0.6),
    sig(R::DoorToLight, K::Door, K::Light, Same(0.6), 60.0, 0.8),
    sig(R::DoorToLock, K::Door, K::Lock, Same(0.8), 300.0, 0.95),
    sig(R::DoorToAlarm, K::Door, K::Alarm, Any, 300.0, 0.85),
    sig(R::WindowToClimate, K::Window, K::Climate, Opposite(0.6), 300.0, 0.8),
    sig(R::PresenceToLight, K::Presence, K::Light, Same(0.6), 300.0, 0.75),
    sig(R::PresenceToClimate, K::Presence, K::Climate, Same(0.5), 300.0, 0.7),
    sig(R::PresenceToLock, K::Presence, K::Lock, Same(0.6), 300.0, 0.85),
    sig(R::TemperatureToClimate, K::Temperature, K::Climate, Any, 300.0, 0.7),
    sig(R::HumidityToFan, K::Humidity, K::Fan, Any, 300.0, 0.75),
    sig(R::LightToMedia, K::Light, K::Media, Same(0.5), 300.0, 0.5),
    sig(R::MediaToLight, K::Media, K::Light, Opposite(0.5), 120.0, 0.55),
    sig(R::SwitchToLight, K::Switch, K::Light, Same(0.6), 60.0, 0.6),
    sig(R::LightToLight, K::Light, K::Light, Same(0.7), 60.0, 0.5),
];

const GENERIC_PRIOR: f64 = 0.4;

impl RelationshipType {
    pub const ALL: [RelationshipType; 16] = [
        R::MotionToLight,
        R::MotionToClimate,
        R::DoorToLight,
        R::DoorToLock,
        R::DoorToAlarm,
        R::WindowToClimate,
        R::PresenceToLight,
        R::PresenceToClimate,
        R::PresenceToLock,
        R::TemperatureToClimate,
        R::HumidityToFan,
        R::LightToMedia,
        R::MediaToLight,
        R::SwitchToLight,
        R::LightToLight,
        R::GenericSequence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            R::MotionToLight => "motion_to_light",
            R::MotionToClimate => "motion_to_climate",
            R::DoorToLight => "door_to_light",
            R::DoorToLock => "door_to_lock",
            R::DoorToAlarm => "door_to_alarm",
            R::WindowToClimate => "window_to_climate",
            R::PresenceToLight => "presence_to_light",
            R::PresenceToClimate => "presence_to_climate",
            R::PresenceToLock => "presence_to_lock",
            R::TemperatureToClimate => "temperature_to_climate",
            R::HumidityToFan => "humidity_to_fan",
            R::LightToMedia => "light_to_media",
            R::MediaToLight => "media_to_light",
            R::SwitchToLight => "switch_to_light",
            R::LightToLight => "light_to_light",
            R::GenericSequence => "generic_sequence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == s)
    }

    pub fn prior(&self) -> f64 {
        SIGNATURES
            .iter()
            .find(|s| s.relationship == *self)
            .map_or(GENERIC_PRIOR, |s| s.prior)
    }

    pub fn is_climate(&self) -> bool {
        matches!(
            self,
            R::MotionToClimate
                | R::WindowToClimate
                | R::PresenceToClimate
                | R::TemperatureToClimate
                | R::HumidityToFan
        )
    }

    pub fn is_lighting(&self) -> bool {
        matches!(
            self,
            R::MotionToLight
                | R::DoorToLight
                | R::PresenceToLight
                | R::MediaToLight
                | R::SwitchToLight
                | R::LightToLight
        )
    }

    pub fn is_security(&self) -> bool {
        matches!(self, R::DoorToLock | R::DoorToAlarm | R::PresenceToLock)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing evidence for one directed edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeTiming {
    pub median_delay_secs: f64,
    /// Share of directional pairs moving the same way; `None` when the
    /// trigger carries no direction (numeric sensors).
    pub same_direction_ratio: Option<f64>,
}

/// Agreement the signature cares about, in [0, 1].
pub fn agreement_score(agreement: Agreement, same_ratio: Option<f64>) -> Option<f64> {
    let same = same_ratio?;
    Some(match agreement {
        Same(_) => same,
        Opposite(_) => 1.0 - same,
        Any => same.max(1.0 - same),
    })
}

fn satisfies(signature: &Signature, timing: &EdgeTiming) -> bool {
    if timing.median_delay_secs > signature.max_median_delay_secs {
        return false;
    }
    match signature.agreement {
        Any => true,
        Same(min) | Opposite(min) => agreement_score(signature.agreement, timing.same_direction_ratio)
            .is_some_and(|a| a >= min),
    }
}

/// Classify a directed edge; anything failing its signature is a generic sequence.
pub fn classify(from: DeviceKind, to: DeviceKind, timing: &EdgeTiming) -> (RelationshipType, Agreement) {
    SIGNATURES
        .iter()
        .find(|s| s.from == from && s.to == to)
        .filter(|s| satisfies(s, timing))
        .map_or((R::GenericSequence, Any), |s| (s.relationship, s.agreement))
}
