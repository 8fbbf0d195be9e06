// src/patterns/detectors/time_of_day.rs — Devices used at a consistent time of day

use chrono::{DateTime, Timelike, Utc};
use std::collections::BTreeMap;
use std::f64::consts::TAU;

use crate::core::types::{Event, EventWindow, PatternCandidate, PatternType};
use crate::infra::config::DetectorsConfig;
use crate::patterns::activity::{activations, by_device};
use crate::patterns::ml::MiniBatchKMeans;

const MINUTES_PER_DAY: f64 = 1_440.0;

#[derive(Debug, Clone)]
pub struct TimeOfDayDetector {
    pub min_support: usize,
    pub min_fit_samples: usize,
    pub clusters: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub max_spread_minutes: f64,
    pub concentration_ratio: f64,
    pub seed: u64,
}

/// A group of activations around one time of day.
#[derive(Debug, Clone)]
struct TimeCluster<'a> {
    members: Vec<&'a Event>,
}

impl TimeCluster<'_> {
    fn minutes(&self) -> Vec<f64> {
        self.members.iter().map(|e| minute_of_day(&e.timestamp)).collect()
    }
}

impl TimeOfDayDetector {
    pub fn from_config(cfg: &DetectorsConfig) -> Self {
        Self {
            min_support: cfg.min_support,
            min_fit_samples: cfg.min_fit_samples,
            clusters: cfg.kmeans_clusters,
            epochs: cfg.kmeans_epochs,
            batch_size: cfg.kmeans_batch_size,
            max_spread_minutes: cfg.max_spread_minutes,
            concentration_ratio: cfg.concentration_ratio,
            seed: cfg.seed,
        }
    }

    pub fn detect(&self, window: &EventWindow) -> anyhow::Result<Vec<PatternCandidate>> {
        let acts = activations(&window.events);
        let mut out = Vec::new();
        for (idx, (device, events)) in by_device(&acts).into_iter().enumerate() {
            if events.len() < self.min_support {
                continue;
            }
            let total = events.len();
            let (clusters, method) = if total >= self.min_fit_samples {
                (self.cluster(&events, self.seed.wrapping_add(idx as u64))?, "kmeans")
            } else {
                (self.histogram(&events), "histogram")
            };

            for cluster in clusters {
                let minutes = cluster.minutes();
                let (mean, spread) = circular_stats(&minutes);
                if cluster.members.len() < self.min_support || spread > self.max_spread_minutes {
                    continue;
                }
                let share = cluster.members.len() as f64 / total as f64;
                if method == "histogram" && share < self.concentration_ratio {
                    continue;
                }
                out.push(
                    PatternCandidate::new(PatternType::TimeOfDay, window.window)
                        .with_device(device, &events[0].domain)
                        .with_confidence(share)
                        .with_meta("mean_minute", mean.round())
                        .with_meta("spread_minutes", (spread * 10.0).round() / 10.0)
                        .with_meta("method", method)
                        .with_occurrences(cluster.members.iter().map(|e| e.timestamp)),
                );
            }
        }
        Ok(out)
    }

    fn cluster<'a>(&self, events: &[&'a Event], seed: u64) -> anyhow::Result<Vec<TimeCluster<'a>>> {
        let points: Vec<[f64; 2]> = events
            .iter()
            .map(|e| embed(minute_of_day(&e.timestamp)))
            .collect();
        let mut model = MiniBatchKMeans::<2>::new(self.clusters, self.batch_size, seed);
        model.fit(&points, self.epochs)?;

        let mut groups: BTreeMap<usize, Vec<&Event>> = BTreeMap::new();
        for (event, point) in events.iter().zip(&points) {
            if let Some(c) = model.predict(point) {
                groups.entry(c).or_default().push(event);
            }
        }
        let mut clusters: Vec<TimeCluster> = groups
            .into_values()
            .map(|members| TimeCluster { members })
            .collect();

        // Merge clusters whose centres sit closer than the spread limit.
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for i in 0..clusters.len() {
                for j in (i + 1)..clusters.len() {
                    let (mi, _) = circular_stats(&clusters[i].minutes());
                    let (mj, _) = circular_stats(&clusters[j].minutes());
                    if circular_distance(mi, mj) <= self.max_spread_minutes {
                        let absorbed = clusters.remove(j);
                        clusters[i].members.extend(absorbed.members);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
        for cluster in &mut clusters {
            cluster.members.sort_by_key(|e| e.timestamp);
        }
        Ok(clusters)
    }

    /// Heuristic for small samples: the busiest two-hour band.
    fn histogram<'a>(&self, events: &[&'a Event]) -> Vec<TimeCluster<'a>> {
        let mut hours = [0usize; 24];
        for e in events {
            hours[e.timestamp.hour() as usize] += 1;
        }
        let best = (0..24)
            .max_by_key(|h| (hours[*h] + hours[(*h + 1) % 24], std::cmp::Reverse(*h)))
            .unwrap_or(0);
        let members = events
            .iter()
            .copied()
            .filter(|e| {
                let h = e.timestamp.hour() as usize;
                h == best || h == (best + 1) % 24
            })
            .collect();
        vec![TimeCluster { members }]
    }
}

pub(crate) fn minute_of_day(ts: &DateTime<Utc>) -> f64 {
    (ts.hour() * 60 + ts.minute()) as f64 + ts.second() as f64 / 60.0
}

fn embed(minute: f64) -> [f64; 2] {
    let angle = TAU * minute / MINUTES_PER_DAY;
    [angle.cos(), angle.sin()]
}

/// Circular mean and circular standard deviation, both in minutes.
pub(crate) fn circular_stats(minutes: &[f64]) -> (f64, f64) {
    if minutes.is_empty() {
        return (0.0, MINUTES_PER_DAY);
    }
    let n = minutes.len() as f64;
    let (s, c) = minutes.iter().fold((0.0, 0.0), |(s, c), m| {
        let a = TAU * m / MINUTES_PER_DAY;
        (s + a.sin(), c + a.cos())
    });
    let mean_angle = (s / n).atan2(c / n).rem_euclid(TAU);
    let r = ((s / n).powi(2) + (c / n).powi(2)).sqrt().clamp(1e-12, 1.0);
    let spread = (-2.0 * r.ln()).sqrt() * MINUTES_PER_DAY / TAU;
    (mean_angle * MINUTES_PER_DAY / TAU, spread)
}

fn circular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % MINUTES_PER_DAY;
    d.min(MINUTES_PER_DAY - d)
}
