// src/patterns/detectors/room_based.rs — Devices that burst together within one area

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{Event, EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, pair_key};

#[derive(Debug, Clone)]
pub struct RoomBasedDetector {
    pub burst_gap_secs: i64,
    pub min_support: usize,
}

impl RoomBasedDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            burst_gap_secs: cfg.pair_window_secs,
            min_support: cfg.min_support,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let acts = activations(&window.events);
        let mut per_area: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
        for event in acts {
            if let Some(area) = event.area_id.as_deref() {
                per_area.entry(area).or_default().push(event);
            }
        }

        let gap = Duration::seconds(self.burst_gap_secs);
        let mut out = Vec::new();
        for (area, events) in per_area {
            let bursts = split_bursts(&events, gap);
            let mut pair_bursts: BTreeMap<(&str, &str), BTreeSet<DateTime<Utc>>> = BTreeMap::new();
            let mut device_bursts: BTreeMap<&str, usize> = BTreeMap::new();
            let mut domains: BTreeMap<&str, &str> = BTreeMap::new();
            for burst in &bursts {
                let devices: BTreeSet<&str> = burst.iter().map(|e| e.device_id.as_str()).collect();
                for e in burst {
                    domains.entry(e.device_id.as_str()).or_insert(e.domain.as_str());
                }
                for d in &devices {
                    *device_bursts.entry(d).or_default() += 1;
                }
                let devices: Vec<&str> = devices.into_iter().collect();
                for (i, &a) in devices.iter().enumerate() {
                    for &b in &devices[i + 1..] {
                        pair_bursts
                            .entry(pair_key(a, b))
                            .or_default()
                            .insert(burst[0].timestamp);
                    }
                }
            }
            for ((a, b), times) in pair_bursts {
                if times.len() < self.min_support {
                    continue;
                }
                let either = device_bursts[a].max(device_bursts[b]);
                out.push(
                    PatternCandidate::new(PatternType::RoomBased, window.window)
                        .with_device(a, domains[a])
                        .with_device(b, domains[b])
                        .with_confidence(times.len() as f64 / either.max(1) as f64)
                        .with_meta("area_id", area)
                        .with_meta("bursts", times.len())
                        .with_occurrences(times),
                );
            }
        }
        Ok(out)
    }
}

/// Split time-ordered events wherever the gap exceeds `gap`.
pub(crate) fn split_bursts<'a>(events: &[&'a Event], gap: Duration) -> Vec<Vec<&'a Event>> {
    let mut bursts: Vec<Vec<&Event>> = Vec::new();
    for event in events {
        match bursts.last_mut() {
            Some(current)
                if current
                    .last()
                    .is_some_and(|prev| event.timestamp - prev.timestamp <= gap) =>
            {
                current.push(event)
            }
            _ => bursts.push(vec![event]),
        }
    }
    bursts
}
