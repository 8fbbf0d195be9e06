// src/patterns/detectors/contextual.rs — Activations concentrated under one context state

use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{Event, EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::is_context_domain;

#[derive(Debug, Clone)]
pub struct ContextualDetector {
    pub min_support: usize,
    pub concentration_ratio: f64,
}

impl ContextualDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_support: cfg.min_support,
            concentration_ratio: cfg.concentration_ratio,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        // Replay context entities' states alongside device activations.
        let mut context: BTreeMap<&str, &str> = BTreeMap::new();
        let mut seen_states: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        // (device, context entity, context state) -> activations
        let mut tallies: BTreeMap<(&str, &str, &str), Vec<&Event>> = BTreeMap::new();
        let mut device_totals: BTreeMap<(&str, &str), usize> = BTreeMap::new();

        for event in window.events.iter() {
            if is_context_domain(&event.domain) {
                context.insert(event.entity_id.as_str(), event.state_to.as_str());
                seen_states
                    .entry(event.entity_id.as_str())
                    .or_default()
                    .insert(event.state_to.as_str());
                continue;
            }
            if !event.is_activation() {
                continue;
            }
            let device = event.device_id.as_str();
            for (&entity, &state) in &context {
                *device_totals.entry((device, entity)).or_default() += 1;
                tallies
                    .entry((device, entity, state))
                    .or_default()
                    .push(event);
            }
        }

        let mut out = Vec::new();
        for ((device, entity, state), events) in tallies {
            let total = device_totals.get(&(device, entity)).copied().unwrap_or(0);
            let distinct = seen_states.get(entity).map_or(0, |s| s.len());
            if events.len() < self.min_support || total == 0 || distinct < 2 {
                continue;
            }
            let ratio = events.len() as f64 / total as f64;
            if ratio < self.concentration_ratio {
                continue;
            }
            out.push(
                PatternCandidate::new(PatternType::Contextual, window.window)
                    .with_device(device, &events[0].domain)
                    .with_confidence(ratio)
                    .with_meta("context_entity", entity)
                    .with_meta("context_state", state)
                    .with_occurrences(events.iter().map(|e| e.timestamp)),
            );
        }
        Ok(out)
    }
}
