// src/patterns/activity.rs — Activation views over an event window

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::core::types::{Direction, Event};

/// Coarse role of a device, derived from its domain and entity naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    Motion,
    Door,
    Window,
    Presence,
    Temperature,
    Humidity,
    Light,
    Switch,
    Media,
    Climate,
    Lock,
    Alarm,
    Fan,
    Other,
}

impl DeviceKind {
    pub fn classify(domain: &str, entity_id: &str) -> Self {
        let name = entity_id.to_ascii_lowercase();
        match domain {
            "light" => Self::Light,
            "switch" | "input_boolean" => Self::Switch,
            "media_player" => Self::Media,
            "climate" | "water_heater" => Self::Climate,
            "lock" => Self::Lock,
            "alarm_control_panel" => Self::Alarm,
            "fan" | "humidifier" => Self::Fan,
            "person" | "device_tracker" => Self::Presence,
            "binary_sensor" | "sensor" => {
                if name.contains("motion") || name.contains("occupancy") {
                    Self::Motion
                } else if name.contains("door") {
                    Self::Door
                } else if name.contains("window") {
                    Self::Window
                } else if name.contains("presence") {
                    Self::Presence
                } else if name.contains("temperature") || name.contains("temp") {
                    Self::Temperature
                } else if name.contains("humidity") {
                    Self::Humidity
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }

    /// Sensors and trackers that report but cannot be commanded.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            Self::Motion
                | Self::Door
                | Self::Window
                | Self::Presence
                | Self::Temperature
                | Self::Humidity
        )
    }
}

/// Domains whose entities describe surrounding context rather than devices.
pub const CONTEXT_DOMAINS: &[&str] = &["sun", "person", "device_tracker", "input_select", "weather"];

pub fn is_context_domain(domain: &str) -> bool {
    CONTEXT_DOMAINS.contains(&domain)
}

/// All activations in the window, in timestamp order.
pub fn activations(events: &[Event]) -> Vec<&Event> {
    events.iter().filter(|e| e.is_activation()).collect()
}

/// Events that carry a direction, in timestamp order.
pub fn directional(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|e| e.direction() != Direction::Neutral)
        .collect()
}

/// Activations grouped per device. Device order is lexical so that every
/// pass over the map is reproducible.
pub fn by_device<'a>(acts: &[&'a Event]) -> BTreeMap<&'a str, Vec<&'a Event>> {
    let mut map: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in acts {
        map.entry(event.device_id.as_str()).or_default().push(event);
    }
    map
}

pub fn timestamps(events: &[&Event]) -> Vec<DateTime<Utc>> {
    events.iter().map(|e| e.timestamp).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Coefficient of variation; `None` when the mean is ~0.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values);
    if values.is_empty() || m.abs() < f64::EPSILON {
        return None;
    }
    Some(std_dev(values) / m.abs())
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Ordered device pair key.
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
