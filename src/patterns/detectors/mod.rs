// src/patterns/detectors/mod.rs — The closed set of pattern detectors

pub mod anomaly;
pub mod co_occurrence;
pub mod contextual;
pub mod day_type;
pub mod duration;
pub mod room_based;
pub mod seasonal;
pub mod sequence;
pub mod session;
pub mod time_of_day;

pub use anomaly::AnomalyDetector;
pub use co_occurrence::CoOccurrenceDetector;
pub use contextual::ContextualDetector;
pub use day_type::DayTypeDetector;
pub use duration::DurationDetector;
pub use room_based::RoomBasedDetector;
pub use seasonal::SeasonalDetector;
pub use sequence::SequenceDetector;
pub use session::SessionDetector;
pub use time_of_day::TimeOfDayDetector;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::core::types::{Event, EventWindow, TimeWindow};

    /// Monday, so weekday arithmetic in tests stays readable.
    pub fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
    }

    pub fn ev(entity_id: &str, area: &str, day: i64, minute: i64, state: &str) -> Event {
        ev_secs(entity_id, area, day, minute, 0, state)
    }

    pub fn ev_secs(
        entity_id: &str,
        area: &str,
        day: i64,
        minute: i64,
        secs: i64,
        state: &str,
    ) -> Event {
        let (domain, object) = entity_id.split_once('.').unwrap();
        Event {
            entity_id: entity_id.to_string(),
            domain: domain.to_string(),
            device_id: format!("dev_{object}"),
            area_id: Some(area.to_string()),
            timestamp: base()
                + Duration::days(day)
                + Duration::minutes(minute)
                + Duration::seconds(secs),
            state_from: None,
            state_to: state.to_string(),
        }
    }

    pub fn window_of(mut events: Vec<Event>, days: i64) -> EventWindow {
        events.sort_by_key(|e| e.timestamp);
        EventWindow::new(TimeWindow::new(base(), base() + Duration::days(days)), events).unwrap()
    }
}
