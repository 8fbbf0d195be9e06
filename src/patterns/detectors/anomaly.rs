// src/patterns/detectors/anomaly.rs — Days on which a device behaves unusually

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use std::collections::BTreeMap;

use crate::core::types::{Event, EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device, mean, std_dev};
use crate::patterns::ml::IsolationForest;

const Z_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    pub min_days: usize,
    pub threshold: f64,
    pub trees: usize,
    pub sample_size: usize,
    pub seed: u64,
    pub min_support: usize,
}

/// Per-day feature row for one device.
#[derive(Debug, Clone)]
struct DayFeatures<'a> {
    day: NaiveDate,
    events: Vec<&'a Event>,
}

impl DayFeatures<'_> {
    fn vector(&self) -> Vec<f64> {
        let hours: Vec<f64> = self
            .events
            .iter()
            .map(|e| e.timestamp.hour() as f64 + e.timestamp.minute() as f64 / 60.0)
            .collect();
        vec![self.events.len() as f64, mean(&hours)]
    }

    fn marker(&self) -> Option<DateTime<Utc>> {
        match self.events.first() {
            Some(e) => Some(e.timestamp),
            None => self.day.and_hms_opt(0, 0, 0).map(|t| t.and_utc()),
        }
    }
}

impl AnomalyDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_days: cfg.anomaly_min_days,
            threshold: cfg.anomaly_threshold,
            trees: cfg.forest_trees,
            sample_size: cfg.forest_sample_size,
            seed: cfg.seed,
            min_support: cfg.min_support,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let acts = activations(&window.events);
        let mut out = Vec::new();
        for (idx, (device, events)) in by_device(&acts).into_iter().enumerate() {
            if events.len() < self.min_support {
                continue;
            }
            let days = self.daily(window, &events);
            let (flagged, method) = if days.len() >= self.min_days {
                (
                    self.forest_outliers(&days, self.seed.wrapping_add(idx as u64))?,
                    "isolation_forest",
                )
            } else {
                (zscore_outliers(&days), "zscore")
            };
            if flagged.is_empty() {
                continue;
            }
            let top = flagged.iter().map(|(_, s)| *s).fold(0.0, f64::max);
            out.push(
                PatternCandidate::new(PatternType::Anomaly, window.window)
                    .with_device(device, &events[0].domain)
                    .with_confidence(top)
                    .with_meta("method", method)
                    .with_meta("anomalous_days", flagged.len())
                    .with_occurrences(flagged.iter().filter_map(|(d, _)| d.marker())),
            );
        }
        Ok(out)
    }

    fn daily<'a>(&self, window: &EventWindow, events: &[&'a Event]) -> Vec<DayFeatures<'a>> {
        let mut by_day: BTreeMap<NaiveDate, Vec<&Event>> = BTreeMap::new();
        let mut day = window.window.start.date_naive();
        let last = (window.window.end - Duration::nanoseconds(1)).date_naive();
        while day <= last {
            by_day.insert(day, Vec::new());
            day += Duration::days(1);
        }
        for e in events {
            by_day.entry(e.timestamp.date_naive()).or_default().push(e);
        }
        by_day
            .into_iter()
            .map(|(day, events)| DayFeatures { day, events })
            .collect()
    }

    fn forest_outliers<'d, 'a>(
        &self,
        days: &'d [DayFeatures<'a>],
        seed: u64,
    ) -> anyhow::Result<Vec<(&'d DayFeatures<'a>, f64)>> {
        let rows: Vec<Vec<f64>> = days.iter().map(DayFeatures::vector).collect();
        let mut forest = IsolationForest::new(self.trees, self.sample_size, seed);
        forest.partial_fit(&rows)?;
        let mut flagged = Vec::new();
        for (day, row) in days.iter().zip(&rows) {
            let score = forest.score(row)?;
            if score >= self.threshold {
                flagged.push((day, score));
            }
        }
        Ok(flagged)
    }
}

/// Small-sample fallback: daily counts more than three deviations off the mean.
fn zscore_outliers<'d, 'a>(days: &'d [DayFeatures<'a>]) -> Vec<(&'d DayFeatures<'a>, f64)> {
    let counts: Vec<f64> = days.iter().map(|d| d.events.len() as f64).collect();
    let m = mean(&counts);
    let sd = std_dev(&counts);
    if sd <= f64::EPSILON {
        return Vec::new();
    }
    days.iter()
        .zip(&counts)
        .filter_map(|(day, c)| {
            let z = (c - m).abs() / sd;
            (z >= Z_THRESHOLD).then(|| (day, (z / (z + 1.0)).min(1.0)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::detectors::test_support::*;

    fn burst_history() -> Vec<crate::core::types::Event> {
        let mut events = Vec::new();
        for day in 0..28 {
            events.push(ev("light.garage", "garage", day, 18 * 60, "on"));
            events.push(ev("light.garage", "garage", day, 18 * 60 + 30, "off"));
        }
        // One night of repeated toggling at 3am.
        for i in 0..25 {
            events.push(ev("light.garage", "garage", 20, 3 * 60 + i * 2, "on"));
            events.push(ev_secs("light.garage", "garage", 20, 3 * 60 + i * 2, 30, "off"));
        }
        events
    }

    #[test]
    fn test_forest_flags_burst_day() {
        let found = AnomalyDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(burst_history(), 28))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["method"], "isolation_forest");
        let marker = found[0].occurrence_times.iter().next().unwrap();
        assert_eq!(marker.date_naive(), (base() + Duration::days(20)).date_naive());
    }

    #[test]
    fn test_zero_trees_is_an_error() {
        let mut detector = AnomalyDetector::from_config(&DetectorsConfig::default());
        detector.trees = 0;
        assert!(detector.detect(&window_of(burst_history(), 28)).is_err());
    }

    #[test]
    fn test_zscore_fallback_for_short_history() {
        let mut events = Vec::new();
        for day in 0..12 {
            events.push(ev("switch.pump", "yard", day, 600, "on"));
            events.push(ev("switch.pump", "yard", day, 660, "off"));
        }
        for i in 0..30 {
            events.push(ev("switch.pump", "yard", 4, 700 + i * 3, "on"));
            events.push(ev_secs("switch.pump", "yard", 4, 700 + i * 3, 30, "off"));
        }
        let found = AnomalyDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(events, 12))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["method"], "zscore");
    }
}
