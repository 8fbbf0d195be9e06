// src/synergy/chains.rs — Multi-device chains from consistent pairwise edges

use std::collections::{BTreeMap, BTreeSet};

use super::ScoredEdge;

/// A 3–4 entity chain and the edges (indices into the scored edge list) it walks.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainScore {
    pub entities: Vec<String>,
    pub edge_indices: Vec<usize>,
    pub geometric_mean: f64,
    pub discount: f64,
    pub benefit: f64,
    pub confidence: f64,
    pub total_delay_secs: f64,
    pub supporting: BTreeSet<String>,
}

pub struct ChainBuilder {
    pub window_secs: f64,
    pub max_length: usize,
    pub hop_discount: f64,
    pub max_chains: usize,
}

impl ChainBuilder {
    /// Extend edges transitively while the summed median delay fits in the
    /// window. Returns the best `max_chains` by benefit, ties by entity order.
    pub fn build(&self, edges: &[ScoredEdge]) -> Vec<ChainScore> {
        if self.max_length < 3 {
            return Vec::new();
        }
        let mut outgoing: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, e) in edges.iter().enumerate() {
            outgoing.entry(e.from.as_str()).or_default().push(i);
        }

        let mut chains = Vec::new();
        for (i, first) in edges.iter().enumerate() {
            let mut path = vec![i];
            let mut visited = vec![first.from.as_str(), first.to.as_str()];
            self.extend(
                edges,
                &outgoing,
                &mut path,
                &mut visited,
                first.median_delay_secs,
                &mut chains,
            );
        }
        chains.sort_by(|a: &ChainScore, b| {
            b.benefit
                .total_cmp(&a.benefit)
                .then_with(|| a.entities.cmp(&b.entities))
        });
        chains.truncate(self.max_chains);
        chains
    }

    fn extend<'e>(
        &self,
        edges: &'e [ScoredEdge],
        outgoing: &BTreeMap<&str, Vec<usize>>,
        path: &mut Vec<usize>,
        visited: &mut Vec<&'e str>,
        delay: f64,
        out: &mut Vec<ChainScore>,
    ) {
        if visited.len() >= self.max_length {
            return;
        }
        let Some(tail) = visited.last().copied() else {
            return;
        };
        let Some(next) = outgoing.get(tail) else {
            return;
        };
        for &j in next {
            let edge = &edges[j];
            let total = delay + edge.median_delay_secs;
            if total > self.window_secs || visited.contains(&edge.to.as_str()) {
                continue;
            }
            path.push(j);
            visited.push(edge.to.as_str());
            out.push(self.score(edges, path, visited, total));
            self.extend(edges, outgoing, path, visited, total, out);
            path.pop();
            visited.pop();
        }
    }

    fn score(&self, edges: &[ScoredEdge], path: &[usize], visited: &[&str], total: f64) -> ChainScore {
        let benefits: Vec<f64> = path.iter().map(|&i| edges[i].benefit.max(1e-9)).collect();
        let geometric_mean =
            (benefits.iter().map(|b| b.ln()).sum::<f64>() / benefits.len() as f64).exp();
        let discount = self.hop_discount.powi(path.len() as i32 - 1);
        let confidence = path
            .iter()
            .map(|&i| edges[i].confidence)
            .fold(1.0, f64::min);
        let supporting = path
            .iter()
            .flat_map(|&i| edges[i].supporting.iter().cloned())
            .collect();
        ChainScore {
            entities: visited.iter().map(|s| s.to_string()).collect(),
            edge_indices: path.to_vec(),
            geometric_mean,
            discount,
            benefit: (geometric_mean * discount).clamp(0.0, 1.0),
            confidence,
            total_delay_secs: total,
            supporting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synergy::relationship::RelationshipType;

    fn edge(from: &str, to: &str, benefit: f64, delay: f64) -> ScoredEdge {
        ScoredEdge {
            from: from.into(),
            to: to.into(),
            relationship: RelationshipType::GenericSequence,
            benefit,
            confidence: benefit,
            median_delay_secs: delay,
            ..Default::default()
        }
    }

    fn builder() -> ChainBuilder {
        ChainBuilder {
            window_secs: 300.0,
            max_length: 4,
            hop_discount: 0.9,
            max_chains: 20,
        }
    }

    #[test]
    fn test_three_and_four_chains() {
        let edges = vec![
            edge("a", "b", 0.8, 30.0),
            edge("b", "c", 0.5, 30.0),
            edge("c", "d", 0.4, 30.0),
        ];
        let chains = builder().build(&edges);
        let lengths: BTreeSet<usize> = chains.iter().map(|c| c.entities.len()).collect();
        assert_eq!(lengths, BTreeSet::from([3, 4]));
        let abc = chains
            .iter()
            .find(|c| c.entities == ["a", "b", "c"])
            .unwrap();
        assert!((abc.benefit - (0.8f64 * 0.5).sqrt() * 0.9).abs() < 1e-9);
        assert!((abc.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_delay_budget_and_cycles() {
        let edges = vec![
            edge("a", "b", 0.8, 200.0),
            edge("b", "c", 0.8, 200.0),
            edge("b", "a", 0.8, 10.0),
        ];
        assert!(builder().build(&edges).is_empty());
    }
}
