// src/patterns/detectors/session.rs — Device pairs recurring within activity sessions

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, pair_key};
use crate::patterns::detectors::room_based::split_bursts;

/// Sessions touching more devices than this are whole-house activity, not a signal.
const MAX_SESSION_DEVICES: usize = 12;

#[derive(Debug, Clone)]
pub struct SessionDetector {
    pub gap_secs: i64,
    pub min_support: usize,
}

impl SessionDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            gap_secs: cfg.session_gap_secs,
            min_support: cfg.min_support,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let acts = activations(&window.events);
        let sessions = split_bursts(&acts, Duration::seconds(self.gap_secs));

        let mut pair_sessions: BTreeMap<(&str, &str), BTreeSet<DateTime<Utc>>> = BTreeMap::new();
        let mut device_sessions: BTreeMap<&str, usize> = BTreeMap::new();
        let mut domains: BTreeMap<&str, &str> = BTreeMap::new();
        for session in &sessions {
            let devices: BTreeSet<&str> = session.iter().map(|e| e.device_id.as_str()).collect();
            for e in session {
                domains.entry(e.device_id.as_str()).or_insert(e.domain.as_str());
            }
            for d in &devices {
                *device_sessions.entry(d).or_default() += 1;
            }
            if devices.len() < 2 || devices.len() > MAX_SESSION_DEVICES {
                continue;
            }
            let devices: Vec<&str> = devices.into_iter().collect();
            for (i, &a) in devices.iter().enumerate() {
                for &b in &devices[i + 1..] {
                    pair_sessions
                        .entry(pair_key(a, b))
                        .or_default()
                        .insert(session[0].timestamp);
                }
            }
        }

        let mut out = Vec::new();
        for ((a, b), times) in pair_sessions {
            if times.len() < self.min_support {
                continue;
            }
            let either = device_sessions[a].max(device_sessions[b]).max(1);
            out.push(
                PatternCandidate::new(PatternType::Session, window.window)
                    .with_device(a, domains[a])
                    .with_device(b, domains[b])
                    .with_confidence(times.len() as f64 / either as f64)
                    .with_meta("sessions", times.len())
                    .with_meta("gap_secs", self.gap_secs)
                    .with_occurrences(times),
            );
        }
        Ok(out)
    }
}
