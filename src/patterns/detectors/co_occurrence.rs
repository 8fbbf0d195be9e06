// src/patterns/detectors/co_occurrence.rs — Devices that activate together

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device, pair_key};

#[derive(Debug, Clone)]
pub struct CoOccurrenceDetector {
    pub window_secs: i64,
    pub min_support: usize,
}

impl CoOccurrenceDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            window_secs: cfg.pair_window_secs,
            min_support: cfg.min_support,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let acts = activations(&window.events);
        let per_device = by_device(&acts);
        let horizon = Duration::seconds(self.window_secs);

        // (a, b) -> trigger timestamps. A trigger counts each partner once.
        let mut pairs: BTreeMap<(&str, &str), BTreeSet<DateTime<Utc>>> = BTreeMap::new();
        let mut domains: BTreeMap<&str, &str> = BTreeMap::new();
        for (i, trigger) in acts.iter().enumerate() {
            domains.entry(&trigger.device_id).or_insert(&trigger.domain);
            let mut partners = BTreeSet::new();
            for other in &acts[i + 1..] {
                if other.timestamp - trigger.timestamp > horizon {
                    break;
                }
                if other.device_id != trigger.device_id && partners.insert(other.device_id.as_str())
                {
                    pairs
                        .entry(pair_key(&trigger.device_id, &other.device_id))
                        .or_default()
                        .insert(trigger.timestamp);
                }
            }
        }

        let mut out = Vec::new();
        for ((a, b), times) in pairs {
            if times.len() < self.min_support {
                continue;
            }
            let denom = per_device
                .get(a)
                .map_or(0, Vec::len)
                .max(per_device.get(b).map_or(0, Vec::len))
                .max(1);
            let confidence = times.len() as f64 / denom as f64;
            out.push(
                PatternCandidate::new(PatternType::CoOccurrence, window.window)
                    .with_device(a, domains.get(a).copied().unwrap_or_default())
                    .with_device(b, domains.get(b).copied().unwrap_or_default())
                    .with_confidence(confidence)
                    .with_meta("pair_count", times.len())
                    .with_meta("window_secs", self.window_secs)
                    .with_occurrences(times),
            );
        }
        Ok(out)
    }
}
