// src/patterns/dedup.rs — Candidate deduplication and cross-type conflict resolution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::core::types::{PatternCandidate, PatternType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub input: usize,
    /// Candidates folded into another of the same type and device set.
    pub merged: usize,
    /// Device sets reported under more than one pattern type.
    pub conflicts: usize,
    pub output: usize,
}

/// Merge candidates that describe the same relationship.
///
/// Same device set and type: occurrence times are unioned (restricted to the
/// trailing window, never summed), confidence is the max, and
/// `metadata.cluster_size` records how many candidates were merged. Same
/// device set under different types: the most confident type wins, ties go
/// to the earlier detector, and every type seen is kept as corroboration.
pub fn deduplicate(
    candidates: Vec<PatternCandidate>,
    window_start: DateTime<Utc>,
) -> (Vec<PatternCandidate>, DedupStats) {
    let mut stats = DedupStats {
        input: candidates.len(),
        ..Default::default()
    };

    let mut by_key: BTreeMap<(BTreeSet<String>, PatternType), (PatternCandidate, usize)> =
        BTreeMap::new();
    for candidate in candidates {
        let key = (candidate.device_ids.clone(), candidate.pattern_type);
        match by_key.get_mut(&key) {
            Some((existing, count)) => {
                merge_into(existing, candidate);
                *count += 1;
                stats.merged += 1;
            }
            None => {
                by_key.insert(key, (candidate, 1));
            }
        }
    }

    let mut by_devices: BTreeMap<BTreeSet<String>, Vec<PatternCandidate>> = BTreeMap::new();
    for ((devices, _), (mut candidate, count)) in by_key {
        candidate
            .occurrence_times
            .retain(|ts| *ts >= window_start);
        candidate.metadata.insert("cluster_size".into(), count.into());
        by_devices.entry(devices).or_default().push(candidate);
    }

    let mut out = Vec::with_capacity(by_devices.len());
    for (devices, group) in by_devices {
        if group.len() > 1 {
            stats.conflicts += 1;
        }
        let seen: BTreeSet<PatternType> = group
            .iter()
            .flat_map(|c| c.corroborated_by.iter().copied())
            .collect();
        let Some(mut winner) = group.into_iter().reduce(|best, next| {
            if next.raw_confidence > best.raw_confidence
                || (next.raw_confidence == best.raw_confidence
                    && next.pattern_type < best.pattern_type)
            {
                next
            } else {
                best
            }
        }) else {
            continue;
        };
        if seen.len() > 1 {
            warn!(
                devices = ?devices,
                kept = %winner.pattern_type,
                "Conflicting pattern types for one device set; keeping the most confident"
            );
        }
        winner.corroborated_by = seen;
        out.push(winner);
    }
    stats.output = out.len();
    (out, stats)
}

fn merge_into(existing: &mut PatternCandidate, other: PatternCandidate) {
    existing.occurrence_times.extend(other.occurrence_times);
    existing.corroborated_by.extend(other.corroborated_by);
    existing.domains.extend(other.domains);
    if other.raw_confidence > existing.raw_confidence {
        existing.raw_confidence = other.raw_confidence;
        existing.metadata = other.metadata;
    }
}
