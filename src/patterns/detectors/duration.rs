// src/patterns/detectors/duration.rs — Consistent on → off durations

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::core::types::{Direction, EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{coefficient_of_variation, median};

#[derive(Debug, Clone)]
pub struct DurationDetector {
    pub min_support: usize,
    pub max_cv: f64,
}

impl DurationDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_support: cfg.min_support,
            max_cv: cfg.duration_max_cv,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let mut open: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        let mut spans: BTreeMap<&str, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
        let mut domains: BTreeMap<&str, &str> = BTreeMap::new();

        for event in window.events.iter() {
            let device = event.device_id.as_str();
            match event.direction() {
                Direction::Up => {
                    open.entry(device).or_insert(event.timestamp);
                    domains.entry(device).or_insert(event.domain.as_str());
                }
                Direction::Down => {
                    if let Some(started) = open.remove(device) {
                        let secs = (event.timestamp - started).num_seconds() as f64;
                        if secs > 0.0 {
                            spans.entry(device).or_default().push((started, secs));
                        }
                    }
                }
                Direction::Neutral => {}
            }
        }

        let mut out = Vec::new();
        for (device, runs) in spans {
            if runs.len() < self.min_support {
                continue;
            }
            let secs: Vec<f64> = runs.iter().map(|(_, s)| *s).collect();
            let Some(cv) = coefficient_of_variation(&secs) else {
                continue;
            };
            if cv > self.max_cv {
                continue;
            }
            out.push(
                PatternCandidate::new(PatternType::Duration, window.window)
                    .with_device(device, domains.get(device).copied().unwrap_or_default())
                    .with_confidence(1.0 / (1.0 + cv))
                    .with_meta("median_secs", median(&secs).round())
                    .with_meta("cv", (cv * 1000.0).round() / 1000.0)
                    .with_occurrences(runs.iter().map(|(t, _)| *t)),
            );
        }
        Ok(out)
    }
}
