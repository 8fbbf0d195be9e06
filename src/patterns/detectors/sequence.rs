// src/patterns/detectors/sequence.rs — Ordered activation chains (A → B, A → B → C)

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device};

#[derive(Debug, Clone)]
pub struct SequenceDetector {
    pub window_secs: i64,
    pub min_support: usize,
}

impl SequenceDetector {
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

        let mut chains: BTreeMap<Vec<&str>, BTreeSet<DateTime<Utc>>> = BTreeMap::new();
        let mut domains: BTreeMap<&str, &str> = BTreeMap::new();
        for (i, first) in acts.iter().enumerate() {
            domains.entry(&first.device_id).or_insert(&first.domain);
            // Next distinct device after `first`, then the next after that.
            let Some((j, second)) = acts[i + 1..]
                .iter()
                .enumerate()
                .take_while(|(_, e)| e.timestamp - first.timestamp <= horizon)
                .find(|(_, e)| e.device_id != first.device_id)
            else {
                continue;
            };
            chains
                .entry(vec![first.device_id.as_str(), second.device_id.as_str()])
                .or_default()
                .insert(first.timestamp);

            let third = acts[i + 1 + j + 1..]
                .iter()
                .take_while(|e| e.timestamp - second.timestamp <= horizon)
                .find(|e| e.device_id != first.device_id && e.device_id != second.device_id);
            if let Some(third) = third {
                chains
                    .entry(vec![
                        first.device_id.as_str(),
                        second.device_id.as_str(),
                        third.device_id.as_str(),
                    ])
                    .or_default()
                    .insert(first.timestamp);
            }
        }

        let mut out = Vec::new();
        for (chain, times) in chains {
            if times.len() < self.min_support {
                continue;
            }
            let head = per_device.get(chain[0]).map_or(1, Vec::len).max(1);
            let mut candidate = PatternCandidate::new(PatternType::Sequence, window.window)
                .with_confidence(times.len() as f64 / head as f64)
                .with_meta("order", chain.join(" -> "))
                .with_meta("length", chain.len())
                .with_occurrences(times);
            for device in &chain {
                candidate = candidate.with_device(device, domains.get(device).copied().unwrap_or_default());
            }
            out.push(candidate);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::detectors::test_support::*;

    #[test]
    fn test_two_and_three_step_chains() {
        let mut events = Vec::new();
        for day in 0..5 {
            events.push(ev("binary_sensor.front_door", "entry", day, 18 * 60, "on"));
            events.push(ev_secs("light.entry", "entry", day, 18 * 60, 20, "on"));
            events.push(ev_secs("media_player.tv", "living", day, 18 * 60, 90, "playing"));
        }
        let found = SequenceDetector {
            window_secs: 300,
            min_support: 3,
        }
        .detect(&window_of(events, 6))
        .unwrap();
        let lengths: Vec<usize> = found.iter().map(|c| c.device_ids.len()).collect();
        assert!(lengths.contains(&2));
        assert!(lengths.contains(&3));
        let triple = found.iter().find(|c| c.device_ids.len() == 3).unwrap();
        assert_eq!(triple.occurrences(), 5);
        assert_eq!(
            triple.metadata["order"],
            "dev_front_door -> dev_entry -> dev_tv"
        );
    }
}
