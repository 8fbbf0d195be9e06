// src/patterns/detectors/day_type.rs — Weekday vs weekend usage skew

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::core::types::{Event, EventWindow, PatternCandidate, PatternType, TimeWindow};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device};

#[derive(Debug, Clone)]
pub struct DayTypeDetector {
    pub min_support: usize,
    pub min_skew: f64,
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of (weekday, weekend) calendar days touched by the window.
fn day_counts(window: &TimeWindow) -> (usize, usize) {
    let mut weekdays = 0;
    let mut weekends = 0;
    let mut day = window.start.date_naive();
    let last = (window.end - Duration::nanoseconds(1)).date_naive();
    while day <= last {
        if is_weekend(day) {
            weekends += 1;
        } else {
            weekdays += 1;
        }
        day += Duration::days(1);
    }
    (weekdays, weekends)
}

impl DayTypeDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_support: cfg.min_support,
            min_skew: cfg.day_type_skew,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let (weekdays, weekends) = day_counts(&window.window);
        if weekdays == 0 || weekends == 0 {
            return Ok(Vec::new());
        }
        let acts = activations(&window.events);
        let mut out = Vec::new();
        for (device, events) in by_device(&acts) {
            if events.len() < self.min_support {
                continue;
            }
            let (weekend, weekday): (Vec<&&Event>, Vec<&&Event>) = events
                .iter()
                .partition(|e| is_weekend(e.timestamp.date_naive()));
            let wd_rate = weekday.len() as f64 / weekdays as f64;
            let we_rate = weekend.len() as f64 / weekends as f64;
            let peak = wd_rate.max(we_rate);
            if peak <= 0.0 {
                continue;
            }
            let skew = (wd_rate - we_rate).abs() / peak;
            if skew < self.min_skew {
                continue;
            }
            let (dominant, members) = if wd_rate >= we_rate {
                ("weekday", weekday)
            } else {
                ("weekend", weekend)
            };
            out.push(
                PatternCandidate::new(PatternType::DayType, window.window)
                    .with_device(device, &events[0].domain)
                    .with_confidence(skew)
                    .with_meta("dominant", dominant)
                    .with_meta("weekday_rate", (wd_rate * 100.0).round() / 100.0)
                    .with_meta("weekend_rate", (we_rate * 100.0).round() / 100.0)
                    .with_occurrences(members.iter().map(|e| e.timestamp)),
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::detectors::test_support::*;

    #[test]
    fn test_weekday_only_device() {
        // The test calendar starts on a Monday.
        let mut events = Vec::new();
        for week in 0..2 {
            for day in 0..5 {
                events.push(ev("switch.office", "office", week * 7 + day, 9 * 60, "on"));
            }
        }
        let found = DayTypeDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(events, 14))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["dominant"], "weekday");
        assert!((found[0].raw_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_even_usage_not_reported() {
        let mut events = Vec::new();
        for day in 0..14 {
            events.push(ev("light.hall", "hall", day, 9 * 60, "on"));
        }
        let found = DayTypeDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(events, 14))
            .unwrap();
        assert!(found.is_empty());
    }
}
