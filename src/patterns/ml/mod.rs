// src/patterns/ml/mod.rs — Seeded, incrementally fittable sub-models

pub mod isolation;
pub mod kmeans;

pub use isolation::IsolationForest;
pub use kmeans::MiniBatchKMeans;

/// Squared euclidean distance.
pub(crate) fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
