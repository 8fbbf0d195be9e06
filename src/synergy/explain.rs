// src/synergy/explain.rs — Deterministic, human-readable synergy explanations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chains::ChainScore;
use super::ScoredEdge;

/// Why a synergy was proposed and how its score was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub rationale: String,
    /// Named factors of the benefit score, rounded for display stability.
    pub breakdown: BTreeMap<String, f64>,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub fn explain_edge(edge: &ScoredEdge) -> Explanation {
    let direction = match edge.same_direction_ratio {
        Some(r) => format!(", {:.0}% moving the same direction", r * 100.0),
        None => String::new(),
    };
    let support = if edge.supporting.is_empty() {
        String::new()
    } else {
        format!(
            "; corroborated by {} persisted pattern(s)",
            edge.supporting.len()
        )
    };
    let rationale = format!(
        "When {} changes, {} follows in {} of {} cases (median delay {:.0}s{}). Classified as {}{}.",
        edge.from,
        edge.to,
        edge.count,
        edge.trigger_events,
        edge.median_delay_secs,
        direction,
        edge.relationship,
        support
    );

    let mut breakdown = BTreeMap::new();
    breakdown.insert("confidence".to_string(), round4(edge.confidence));
    breakdown.insert("agreement".to_string(), round4(edge.agreement));
    breakdown.insert("tightness".to_string(), round4(edge.tightness));
    breakdown.insert("strength".to_string(), round4(edge.strength));
    breakdown.insert("prior".to_string(), round4(edge.relationship.prior()));
    breakdown.insert("context_multiplier".to_string(), round4(edge.context_multiplier));
    for (name, boost) in &edge.context_boosts {
        breakdown.insert(format!("context_{name}"), round4(*boost));
    }
    breakdown.insert("benefit".to_string(), round4(edge.benefit));
    Explanation {
        rationale,
        breakdown,
    }
}

pub fn explain_chain(chain: &ChainScore, edges: &[&ScoredEdge]) -> Explanation {
    let hops: Vec<String> = edges
        .iter()
        .map(|e| format!("{} ({})", e.relationship, round4(e.benefit)))
        .collect();
    let rationale = format!(
        "Chain {} built from {} consistent steps: {}. Total median delay {:.0}s.",
        chain.entities.join(" -> "),
        edges.len(),
        hops.join(", "),
        chain.total_delay_secs
    );
    let mut breakdown = BTreeMap::new();
    breakdown.insert("geometric_mean".to_string(), round4(chain.geometric_mean));
    breakdown.insert("discount".to_string(), round4(chain.discount));
    breakdown.insert("confidence".to_string(), round4(chain.confidence));
    breakdown.insert("benefit".to_string(), round4(chain.benefit));
    Explanation {
        rationale,
        breakdown,
    }
}
