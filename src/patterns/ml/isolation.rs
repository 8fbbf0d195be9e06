// src/patterns/ml/isolation.rs — Isolation forest with reservoir-based partial fitting

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Isolation forest. `partial_fit` folds new samples into a bounded
/// reservoir and rebuilds the trees from it, so the model tracks the most
/// representative history without holding all of it.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_trees: usize,
    sample_size: usize,
    rng: StdRng,
    reservoir: Vec<Vec<f64>>,
    seen: usize,
    trees: Vec<Node>,
    tree_sample: usize,
}

impl IsolationForest {
    pub fn new(n_trees: usize, sample_size: usize, seed: u64) -> Self {
        Self {
            n_trees,
            sample_size: sample_size.max(2),
            rng: StdRng::seed_from_u64(seed),
            reservoir: Vec::new(),
            seen: 0,
            trees: Vec::new(),
            tree_sample: 0,
        }
    }

    fn reservoir_capacity(&self) -> usize {
        self.sample_size * 4
    }

    pub fn partial_fit(&mut self, data: &[Vec<f64>]) -> anyhow::Result<()> {
        if self.n_trees == 0 {
            anyhow::bail!("isolation forest configured with zero trees");
        }
        for row in data {
            self.seen += 1;
            if self.reservoir.len() < self.reservoir_capacity() {
                self.reservoir.push(row.clone());
            } else {
                let slot = self.rng.gen_range(0..self.seen);
                if slot < self.reservoir.len() {
                    self.reservoir[slot] = row.clone();
                }
            }
        }
        if self.reservoir.len() < 2 {
            anyhow::bail!(
                "isolation forest needs at least 2 samples, have {}",
                self.reservoir.len()
            );
        }
        self.rebuild();
        Ok(())
    }

    fn rebuild(&mut self) {
        let n = self.sample_size.min(self.reservoir.len());
        let max_depth = (n as f64).log2().ceil() as usize;
        self.tree_sample = n;
        self.trees.clear();
        for _ in 0..self.n_trees {
            let sample: Vec<&Vec<f64>> = index::sample(&mut self.rng, self.reservoir.len(), n)
                .iter()
                .map(|i| &self.reservoir[i])
                .collect();
            let tree = build(&sample, 0, max_depth, &mut self.rng);
            self.trees.push(tree);
        }
    }

    /// Anomaly score in (0, 1]; ~0.5 is ordinary, values near 1 are isolated.
    pub fn score(&self, point: &[f64]) -> anyhow::Result<f64> {
        if self.trees.is_empty() {
            anyhow::bail!("isolation forest is not fitted");
        }
        let mean_path = self
            .trees
            .iter()
            .map(|t| path_length(t, point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path(self.tree_sample);
        if c <= 0.0 {
            return Ok(0.5);
        }
        Ok(2f64.powf(-mean_path / c))
    }
}

fn build(sample: &[&Vec<f64>], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if depth >= max_depth || sample.len() <= 1 {
        return Node::Leaf { size: sample.len() };
    }
    let dims = sample[0].len();
    // Features that still vary within this partition.
    let candidates: Vec<(usize, f64, f64)> = (0..dims)
        .filter_map(|f| {
            let lo = sample.iter().map(|r| r[f]).fold(f64::INFINITY, f64::min);
            let hi = sample.iter().map(|r| r[f]).fold(f64::NEG_INFINITY, f64::max);
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return Node::Leaf { size: sample.len() };
    }
    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<&Vec<f64>>, Vec<&Vec<f64>>) =
        sample.iter().partition(|r| r[feature] < threshold);
    Node::Split {
        feature,
        threshold,
        left: Box::new(build(&left, depth + 1, max_depth, rng)),
        right: Box::new(build(&right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, point: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let value = point.get(*feature).copied().unwrap_or(0.0);
            if value < *threshold {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + 0.577_215_664_9) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular_days() -> Vec<Vec<f64>> {
        (0..39)
            .map(|i| vec![10.0 + (i % 3) as f64, 18.0 + (i % 2) as f64 * 0.5])
            .collect()
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut data = regular_days();
        data.push(vec![60.0, 3.0]);
        let mut forest = IsolationForest::new(50, 64, 42);
        forest.partial_fit(&data).unwrap();
        let normal = forest.score(&[11.0, 18.0]).unwrap();
        let outlier = forest.score(&[60.0, 3.0]).unwrap();
        assert!(outlier > normal, "outlier {outlier} <= normal {normal}");
        assert!(outlier > 0.6);
    }

    #[test]
    fn test_zero_trees_fails() {
        let mut forest = IsolationForest::new(0, 32, 42);
        assert!(forest.partial_fit(&regular_days()).is_err());
        assert!(forest.score(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_seeded_scores_reproducible() {
        let mut a = IsolationForest::new(20, 16, 9);
        let mut b = IsolationForest::new(20, 16, 9);
        a.partial_fit(&regular_days()).unwrap();
        b.partial_fit(&regular_days()).unwrap();
        assert_eq!(a.score(&[30.0, 2.0]).unwrap(), b.score(&[30.0, 2.0]).unwrap());
    }
}
