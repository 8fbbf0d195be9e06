// src/synergy/graph.rs — Directed device-to-device transition graph

use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};

use super::relationship::EdgeTiming;
use crate::core::types::{Direction, Event};
use crate::patterns::activity::{coefficient_of_variation, median, DeviceKind};

#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub entity_id: String,
    pub device_id: String,
    pub domain: String,
    pub kind: DeviceKind,
}

/// Evidence that `to` reacts to `from`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Edge {
    /// Trigger events of `from` followed by `to` inside the window.
    pub count: usize,
    pub delays_secs: Vec<f64>,
    pub same_direction: usize,
    pub directional_pairs: usize,
    /// All trigger events of `from`, the confidence denominator.
    pub trigger_events: usize,
}

impl Edge {
    pub fn confidence(&self) -> f64 {
        (self.count as f64 / self.trigger_events.max(1) as f64).min(1.0)
    }

    pub fn timing(&self) -> EdgeTiming {
        EdgeTiming {
            median_delay_secs: median(&self.delays_secs),
            same_direction_ratio: (self.directional_pairs > 0)
                .then(|| self.same_direction as f64 / self.directional_pairs as f64),
        }
    }

    /// 1 / (1 + cv) of the delays; perfectly regular delays give 1.
    pub fn tightness(&self) -> f64 {
        match coefficient_of_variation(&self.delays_secs) {
            Some(cv) => 1.0 / (1.0 + cv),
            None => 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SynergyGraph {
    pub entities: BTreeMap<String, EntityInfo>,
    pub edges: BTreeMap<(String, String), Edge>,
}

fn is_trigger_event(event: &Event, kind: DeviceKind) -> bool {
    event.direction() != Direction::Neutral
        || matches!(kind, DeviceKind::Temperature | DeviceKind::Humidity)
}

impl SynergyGraph {
    /// Build edges from every trigger event to each distinct actionable
    /// entity that changes within `window_secs` afterwards.
    pub fn build(events: &[Event], window_secs: i64, actionable: &BTreeSet<String>) -> Self {
        let mut graph = SynergyGraph::default();
        let horizon = Duration::seconds(window_secs);
        let mut trigger_counts: BTreeMap<&str, usize> = BTreeMap::new();

        for event in events {
            graph
                .entities
                .entry(event.entity_id.clone())
                .or_insert_with(|| EntityInfo {
                    entity_id: event.entity_id.clone(),
                    device_id: event.device_id.clone(),
                    domain: event.domain.clone(),
                    kind: DeviceKind::classify(&event.domain, &event.entity_id),
                });
        }

        for (i, trigger) in events.iter().enumerate() {
            let kind = graph.entities[&trigger.entity_id].kind;
            if !is_trigger_event(trigger, kind) {
                continue;
            }
            *trigger_counts.entry(trigger.entity_id.as_str()).or_default() += 1;
            let from_dir = trigger.direction();

            let mut reached = BTreeSet::new();
            for target in &events[i + 1..] {
                let delay = target.timestamp - trigger.timestamp;
                if delay > horizon {
                    break;
                }
                let to_dir = target.direction();
                if to_dir == Direction::Neutral
                    || target.device_id == trigger.device_id
                    || !actionable.contains(&target.domain)
                    || !reached.insert(target.entity_id.as_str())
                {
                    continue;
                }
                let edge = graph
                    .edges
                    .entry((trigger.entity_id.clone(), target.entity_id.clone()))
                    .or_default();
                edge.count += 1;
                edge.delays_secs.push(delay.num_milliseconds() as f64 / 1_000.0);
                if from_dir != Direction::Neutral {
                    edge.directional_pairs += 1;
                    if from_dir == to_dir {
                        edge.same_direction += 1;
                    }
                }
            }
        }

        for ((from, _), edge) in graph.edges.iter_mut() {
            edge.trigger_events = trigger_counts.get(from.as_str()).copied().unwrap_or(0);
        }
        graph
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityInfo> {
        self.entities.get(entity_id)
    }
}
