// src/synergy/mod.rs — Multi-device synergy detection

pub mod chains;
pub mod context;
pub mod explain;
pub mod graph;
pub mod relationship;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::core::types::{synergy_id, Event, LifecycleStatus, Pattern};
use crate::infra::config::SynergyConfig;
use chains::{ChainBuilder, ChainScore};
use context::{ContextBooster, ContextSnapshot};
use explain::{explain_chain, explain_edge, Explanation};
use graph::SynergyGraph;
use relationship::{agreement_score, classify, RelationshipType};

/// A persisted multi-device relationship worth automating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synergy {
    pub id: String,
    pub trigger_entity: String,
    /// Full ordered chain, trigger first; at least two entities.
    pub action_chain: Vec<String>,
    pub relationship_type: RelationshipType,
    pub benefit_score: f64,
    pub confidence: f64,
    pub supporting_pattern_ids: Vec<String>,
    pub status: LifecycleStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub explanation: Explanation,
}

/// A classified, scored pairwise edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredEdge {
    pub from: String,
    pub to: String,
    pub relationship: RelationshipType,
    pub count: usize,
    pub trigger_events: usize,
    pub median_delay_secs: f64,
    pub same_direction_ratio: Option<f64>,
    pub confidence: f64,
    pub agreement: f64,
    pub tightness: f64,
    pub strength: f64,
    pub context_multiplier: f64,
    pub context_boosts: BTreeMap<&'static str, f64>,
    pub benefit: f64,
    pub supporting: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct SynergyOutcome {
    /// Sorted by benefit, best first.
    pub synergies: Vec<Synergy>,
    pub edges_considered: usize,
    pub pairs: usize,
    pub chains: usize,
}

pub struct SynergyDetector {
    config: SynergyConfig,
    actionable: BTreeSet<String>,
    booster: ContextBooster,
}

impl SynergyDetector {
    pub fn new(config: SynergyConfig, actionable_domains: &[String]) -> Self {
        let booster = ContextBooster::new(config.context.clone());
        Self {
            config,
            actionable: actionable_domains.iter().cloned().collect(),
            booster,
        }
    }

    /// Score every qualifying edge and chain in the window. Persisted
    /// patterns covering both ends of an edge raise its confidence. Without
    /// context the benefit is unweighted.
    pub fn detect(
        &self,
        events: &[Event],
        patterns: &[Pattern],
        context: Option<&ContextSnapshot>,
        as_of: DateTime<Utc>,
    ) -> SynergyOutcome {
        let graph = SynergyGraph::build(events, self.config.window_secs, &self.actionable);
        let mut outcome = SynergyOutcome {
            edges_considered: graph.edges.len(),
            ..Default::default()
        };

        let mut scored = Vec::new();
        for ((from, to), edge) in &graph.edges {
            if edge.count < self.config.min_support {
                continue;
            }
            let (Some(src), Some(dst)) = (graph.entity(from), graph.entity(to)) else {
                continue;
            };
            let supporting: BTreeSet<String> = patterns
                .iter()
                .filter(|p| p.status != LifecycleStatus::Deprecated)
                .filter(|p| p.involves(&src.device_id) && p.involves(&dst.device_id))
                .map(|p| p.id.clone())
                .collect();
            let mut confidence = edge.confidence();
            if !supporting.is_empty() {
                confidence = (confidence * (1.0 + self.config.pattern_boost)).min(1.0);
            }
            if confidence < self.config.min_confidence {
                continue;
            }

            let timing = edge.timing();
            let (relationship, agreement_rule) = classify(src.kind, dst.kind, &timing);
            let agreement =
                agreement_score(agreement_rule, timing.same_direction_ratio).unwrap_or(0.5);
            let tightness = edge.tightness();
            let strength = confidence * (0.5 + 0.5 * agreement) * (0.5 + 0.5 * tightness);
            let adjustment = self.booster.adjust(relationship, context);
            let benefit = (strength * relationship.prior() * adjustment.multiplier).clamp(0.0, 1.0);

            scored.push(ScoredEdge {
                from: from.clone(),
                to: to.clone(),
                relationship,
                count: edge.count,
                trigger_events: edge.trigger_events,
                median_delay_secs: timing.median_delay_secs,
                same_direction_ratio: timing.same_direction_ratio,
                confidence,
                agreement,
                tightness,
                strength,
                context_multiplier: adjustment.multiplier,
                context_boosts: adjustment.boosts,
                benefit,
                supporting,
            });
        }
        outcome.pairs = scored.len();

        let chains = ChainBuilder {
            window_secs: self.config.window_secs as f64,
            max_length: self.config.max_chain_length,
            hop_discount: self.config.chain_discount,
            max_chains: self.config.max_chains,
        }
        .build(&scored);
        outcome.chains = chains.len();

        let mut synergies: Vec<Synergy> = scored
            .iter()
            .map(|edge| self.pair_synergy(edge, as_of))
            .collect();
        synergies.extend(
            chains
                .iter()
                .map(|chain| self.chain_synergy(chain, &scored, as_of)),
        );
        synergies.sort_by(|a, b| {
            b.benefit_score
                .total_cmp(&a.benefit_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!(
            edges = outcome.edges_considered,
            pairs = outcome.pairs,
            chains = outcome.chains,
            "Synergy graph scored"
        );
        outcome.synergies = synergies;
        outcome
    }

    fn pair_synergy(&self, edge: &ScoredEdge, as_of: DateTime<Utc>) -> Synergy {
        let chain = vec![edge.from.clone(), edge.to.clone()];
        Synergy {
            id: synergy_id(&edge.from, &chain, edge.relationship.as_str()),
            trigger_entity: edge.from.clone(),
            action_chain: chain,
            relationship_type: edge.relationship,
            benefit_score: edge.benefit,
            confidence: edge.confidence,
            supporting_pattern_ids: edge.supporting.iter().cloned().collect(),
            status: LifecycleStatus::Active,
            first_seen: as_of,
            last_seen: as_of,
            deprecated_at: None,
            explanation: explain_edge(edge),
        }
    }

    fn chain_synergy(&self, chain: &ChainScore, scored: &[ScoredEdge], as_of: DateTime<Utc>) -> Synergy {
        let edges: Vec<&ScoredEdge> = chain.edge_indices.iter().map(|&i| &scored[i]).collect();
        // A chain inherits the relationship of the step that starts it.
        let relationship = edges
            .first()
            .map_or(RelationshipType::GenericSequence, |e| e.relationship);
        let trigger = chain.entities[0].clone();
        Synergy {
            id: synergy_id(&trigger, &chain.entities, relationship.as_str()),
            trigger_entity: trigger,
            action_chain: chain.entities.clone(),
            relationship_type: relationship,
            benefit_score: chain.benefit,
            confidence: chain.confidence,
            supporting_pattern_ids: chain.supporting.iter().cloned().collect(),
            status: LifecycleStatus::Active,
            first_seen: as_of,
            last_seen: as_of,
            deprecated_at: None,
            explanation: explain_chain(chain, &edges),
        }
    }
}
