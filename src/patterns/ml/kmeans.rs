// src/patterns/ml/kmeans.rs — Mini-batch k-means with partial fitting

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::sq_dist;

/// Mini-batch k-means over fixed-dimension points.
///
/// Centroids are seeded from the first batch (farthest-point init from a
/// random start) and then refined with per-centroid learning rates, so
/// repeated `partial_fit` calls converge like a single large fit.
#[derive(Debug, Clone)]
pub struct MiniBatchKMeans<const D: usize> {
    k: usize,
    batch_size: usize,
    rng: StdRng,
    centroids: Vec<[f64; D]>,
    counts: Vec<u64>,
}

impl<const D: usize> MiniBatchKMeans<D> {
    pub fn new(k: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            k: k.max(1),
            batch_size: batch_size.max(1),
            rng: StdRng::seed_from_u64(seed),
            centroids: Vec::new(),
            counts: Vec::new(),
        }
    }

    pub fn centroids(&self) -> &[[f64; D]] {
        &self.centroids
    }

    /// One mini-batch update over `data`.
    pub fn partial_fit(&mut self, data: &[[f64; D]]) -> anyhow::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.centroids.is_empty() {
            self.init_centroids(data);
        }
        let batch = self.batch_size.min(data.len());
        for _ in 0..batch {
            let point = &data[self.rng.gen_range(0..data.len())];
            let c = self.nearest(point);
            self.counts[c] += 1;
            let eta = 1.0 / self.counts[c] as f64;
            for (d, value) in self.centroids[c].iter_mut().enumerate() {
                *value = (1.0 - eta) * *value + eta * point[d];
            }
        }
        Ok(())
    }

    /// Repeated mini-batch passes.
    pub fn fit(&mut self, data: &[[f64; D]], epochs: usize) -> anyhow::Result<()> {
        let passes = epochs.max(1) * data.len().div_ceil(self.batch_size).max(1);
        for _ in 0..passes {
            self.partial_fit(data)?;
        }
        Ok(())
    }

    pub fn predict(&self, point: &[f64; D]) -> Option<usize> {
        if self.centroids.is_empty() {
            None
        } else {
            Some(self.nearest(point))
        }
    }

    fn nearest(&self, point: &[f64; D]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            let d = sq_dist(c, point);
            if d < best_dist {
                best = i;
                best_dist = d;
            }
        }
        best
    }

    fn init_centroids(&mut self, data: &[[f64; D]]) {
        let first = data[self.rng.gen_range(0..data.len())];
        self.centroids.push(first);
        while self.centroids.len() < self.k {
            let mut far_idx = None;
            let mut far_dist = 1e-12;
            for (i, p) in data.iter().enumerate() {
                let d = self
                    .centroids
                    .iter()
                    .map(|c| sq_dist(c, p))
                    .fold(f64::INFINITY, f64::min);
                if d > far_dist {
                    far_idx = Some(i);
                    far_dist = d;
                }
            }
            // Fewer distinct points than clusters.
            match far_idx {
                Some(i) => self.centroids.push(data[i]),
                None => break,
            }
        }
        self.counts = vec![0; self.centroids.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<[f64; 2]> {
        let mut data = Vec::new();
        for i in 0..30 {
            let jitter = (i % 5) as f64 * 0.01;
            data.push([0.0 + jitter, 0.0 - jitter]);
            data.push([5.0 - jitter, 5.0 + jitter]);
        }
        data
    }

    #[test]
    fn test_separates_two_blobs() {
        let mut model = MiniBatchKMeans::<2>::new(2, 8, 7);
        model.fit(&blobs(), 5).unwrap();
        let a = model.predict(&[0.0, 0.0]).unwrap();
        let b = model.predict(&[5.0, 5.0]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let mut m1 = MiniBatchKMeans::<2>::new(3, 4, 42);
        let mut m2 = MiniBatchKMeans::<2>::new(3, 4, 42);
        m1.fit(&blobs(), 3).unwrap();
        m2.fit(&blobs(), 3).unwrap();
        assert_eq!(m1.centroids(), m2.centroids());
    }

    #[test]
    fn test_degenerate_data_caps_clusters() {
        let mut model = MiniBatchKMeans::<2>::new(4, 4, 1);
        model.partial_fit(&[[1.0, 1.0], [1.0, 1.0]]).unwrap();
        assert_eq!(model.centroids().len(), 1);
        assert!(MiniBatchKMeans::<2>::new(2, 2, 1).predict(&[0.0, 0.0]).is_none());
    }
}
