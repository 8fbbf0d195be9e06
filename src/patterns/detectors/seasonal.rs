// src/patterns/detectors/seasonal.rs — Month-over-month activation rate swings

use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::BTreeMap;

use crate::core::types::{EventWindow, PatternCandidate, PatternType, TimeWindow};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device};

/// Months covered for fewer days than this are too partial to compare.
const MIN_MONTH_COVERAGE_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct SeasonalDetector {
    pub min_support: usize,
    pub min_span_days: i64,
    pub min_ratio: f64,
}

/// Days of each (year, month) that fall inside the window.
fn month_coverage(window: &TimeWindow) -> BTreeMap<(i32, u32), u32> {
    let mut coverage = BTreeMap::new();
    let mut day = window.start.date_naive();
    let last = (window.end - Duration::nanoseconds(1)).date_naive();
    while day <= last {
        *coverage.entry((day.year(), day.month())).or_insert(0) += 1;
        day += Duration::days(1);
    }
    coverage
}

impl SeasonalDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_support: cfg.min_support,
            min_span_days: cfg.seasonal_min_span_days,
            min_ratio: cfg.seasonal_ratio,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        if (window.window.end - window.window.start).num_days() < self.min_span_days {
            return Ok(Vec::new());
        }
        let coverage: BTreeMap<(i32, u32), u32> = month_coverage(&window.window)
            .into_iter()
            .filter(|(_, days)| *days >= MIN_MONTH_COVERAGE_DAYS)
            .collect();
        if coverage.len() < 2 {
            return Ok(Vec::new());
        }

        let acts = activations(&window.events);
        let mut out = Vec::new();
        for (device, events) in by_device(&acts) {
            if events.len() < self.min_support {
                continue;
            }
            let mut per_month: BTreeMap<(i32, u32), Vec<DateTime<Utc>>> =
                coverage.keys().map(|k| (*k, Vec::new())).collect();
            for e in &events {
                let key = (e.timestamp.year(), e.timestamp.month());
                if let Some(bucket) = per_month.get_mut(&key) {
                    bucket.push(e.timestamp);
                }
            }
            let rates: Vec<((i32, u32), f64)> = per_month
                .iter()
                .map(|(k, ts)| (*k, ts.len() as f64 / coverage[k] as f64))
                .collect();
            let Some(&(peak_month, peak)) = rates.iter().max_by(|a, b| a.1.total_cmp(&b.1)) else {
                continue;
            };
            let trough = rates.iter().map(|(_, r)| *r).fold(f64::INFINITY, f64::min);
            if peak <= 0.0 {
                continue;
            }
            let ratio = if trough > 0.0 { peak / trough } else { f64::INFINITY };
            if ratio < self.min_ratio {
                continue;
            }
            let members = per_month.remove(&peak_month).unwrap_or_default();
            out.push(
                PatternCandidate::new(PatternType::Seasonal, window.window)
                    .with_device(device, &events[0].domain)
                    .with_confidence(1.0 - trough / peak)
                    .with_meta("peak_month", format!("{:04}-{:02}", peak_month.0, peak_month.1))
                    .with_meta(
                        "ratio",
                        if ratio.is_finite() {
                            (ratio * 100.0).round() / 100.0
                        } else {
                            -1.0
                        },
                    )
                    .with_occurrences(members),
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
    fn test_short_span_skipped() {
        let events = (0..20)
            .map(|d| ev("climate.living", "living", d, 600, "heat"))
            .collect();
        let found = SeasonalDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(events, 30))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_winter_heavy_device() {
        // Daily in the first month, weekly afterwards.
        let mut events = Vec::new();
        for d in 0..90 {
            if d < 27 || d % 7 == 0 {
                events.push(ev("climate.living", "living", d, 600, "heat"));
            }
        }
        let found = SeasonalDetector::from_config(&DetectorsConfig::default())
            .detect(&window_of(events, 90))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["peak_month"], "2026-01");
    }
}
