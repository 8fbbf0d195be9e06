// src/memory/lifecycle.rs — Staleness, deprecation and purge of persisted items

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::{LifecycleStatus, Pattern};
use crate::infra::config::LifecycleConfig;
use crate::synergy::Synergy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub created: usize,
    pub refreshed: usize,
    pub reactivated: usize,
    pub needs_review: usize,
    pub deprecated: usize,
    pub purged: usize,
    /// Patterns whose windowed occurrence count dropped.
    pub trimmed: usize,
}

/// Writes needed to bring persisted state up to date. Only changed items
/// are listed, so applying an already-applied plan is a no-op.
#[derive(Debug, Clone, Default)]
pub struct LifecyclePlan {
    pub patterns: Vec<Pattern>,
    pub synergies: Vec<Synergy>,
    pub purge_patterns: Vec<String>,
    pub purge_synergies: Vec<String>,
    pub report: LifecycleReport,
}

impl LifecyclePlan {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
            && self.synergies.is_empty()
            && self.purge_patterns.is_empty()
            && self.purge_synergies.is_empty()
    }
}

/// What a run detected, ready to merge into persisted state.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub patterns: Vec<Pattern>,
    pub synergies: Vec<Synergy>,
    /// Re-detections of persisted items that were not selected this run.
    /// They update existing rows only and never create new ones.
    pub refreshed_patterns: Vec<Pattern>,
    pub refreshed_synergies: Vec<Synergy>,
    /// First day covered by the run's event window. Older histogram days
    /// of a re-detected pattern are kept; newer ones are replaced.
    pub window_start: Option<NaiveDate>,
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    occurrence_window_days: i64,
}

/// Status transitions only move forward until re-detection resets them.
fn rank(status: LifecycleStatus) -> u8 {
    match status {
        LifecycleStatus::Active => 0,
        LifecycleStatus::NeedsReview => 1,
        LifecycleStatus::Deprecated => 2,
    }
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig, occurrence_window_days: u32) -> Self {
        Self {
            config,
            occurrence_window_days: i64::from(occurrence_window_days),
        }
    }

    fn occurrence_start(&self, as_of: DateTime<Utc>) -> NaiveDate {
        (as_of - Duration::days(self.occurrence_window_days)).date_naive()
    }

    /// Merge a run's detections into the persisted items and age the rest.
    pub fn plan(
        &self,
        existing_patterns: &[Pattern],
        existing_synergies: &[Synergy],
        detection: Detection,
        as_of: DateTime<Utc>,
    ) -> LifecyclePlan {
        let mut plan = LifecyclePlan::default();
        let trim_from = self.occurrence_start(as_of);

        let mut fresh: BTreeMap<String, Pattern> = by_id(detection.patterns, |p| &p.id);
        let mut refreshed = by_id(detection.refreshed_patterns, |p| &p.id);
        for old in existing_patterns {
            let redetected = fresh.remove(&old.id).or_else(|| refreshed.remove(&old.id));
            let mut updated = match redetected {
                Some(new) => {
                    self.merge_pattern(old, new, detection.window_start, as_of, &mut plan.report)
                }
                None => match self.age_pattern(old, as_of, &mut plan.report) {
                    Some(p) => p,
                    None => {
                        plan.purge_patterns.push(old.id.clone());
                        continue;
                    }
                },
            };
            if updated.trim_occurrences(trim_from) {
                plan.report.trimmed += 1;
            }
            if updated != *old {
                plan.patterns.push(updated);
            }
        }
        for (_, mut new) in fresh {
            new.trim_occurrences(trim_from);
            plan.report.created += 1;
            plan.patterns.push(new);
        }

        let mut fresh: BTreeMap<String, Synergy> = by_id(detection.synergies, |s| &s.id);
        let mut refreshed = by_id(detection.refreshed_synergies, |s| &s.id);
        for old in existing_synergies {
            let redetected = fresh.remove(&old.id).or_else(|| refreshed.remove(&old.id));
            let updated = match redetected {
                Some(new) => {
                    if old.status != LifecycleStatus::Active {
                        plan.report.reactivated += 1;
                    } else {
                        plan.report.refreshed += 1;
                    }
                    Synergy {
                        first_seen: old.first_seen.min(new.first_seen),
                        ..new
                    }
                }
                None => {
                    let next = self.next_status(
                        old.status,
                        old.last_seen,
                        old.deprecated_at,
                        false,
                        as_of,
                    );
                    let Some((status, deprecated_at)) = next else {
                        plan.report.purged += 1;
                        plan.purge_synergies.push(old.id.clone());
                        continue;
                    };
                    self.count_transition(old.status, status, &mut plan.report);
                    Synergy {
                        status,
                        deprecated_at,
                        ..old.clone()
                    }
                }
            };
            if updated != *old {
                plan.synergies.push(updated);
            }
        }
        for (_, new) in fresh {
            plan.report.created += 1;
            plan.synergies.push(new);
        }

        plan.patterns.sort_by(|a, b| a.id.cmp(&b.id));
        plan.synergies.sort_by(|a, b| a.id.cmp(&b.id));
        plan
    }

    fn merge_pattern(
        &self,
        old: &Pattern,
        new: Pattern,
        window_start: Option<NaiveDate>,
        as_of: DateTime<Utc>,
        report: &mut LifecycleReport,
    ) -> Pattern {
        if old.status != LifecycleStatus::Active {
            report.reactivated += 1;
        } else {
            report.refreshed += 1;
        }
        let mut days: BTreeMap<NaiveDate, u32> = match window_start {
            Some(start) => old
                .occurrence_days
                .iter()
                .filter(|(day, _)| **day < start)
                .map(|(d, c)| (*d, *c))
                .collect(),
            None => BTreeMap::new(),
        };
        days.extend(new.occurrence_days);
        Pattern {
            occurrences: days.values().sum(),
            occurrence_days: days,
            first_seen: old.first_seen.min(new.first_seen),
            last_seen: as_of.max(old.last_seen),
            status: LifecycleStatus::Active,
            deprecated_at: None,
            ..new
        }
    }

    /// `None` means the pattern is due for purge.
    fn age_pattern(
        &self,
        old: &Pattern,
        as_of: DateTime<Utc>,
        report: &mut LifecycleReport,
    ) -> Option<Pattern> {
        let mut aged = old.clone();
        if aged.trim_occurrences(self.occurrence_start(as_of)) {
            report.trimmed += 1;
        }
        let Some((status, deprecated_at)) = self.next_status(
            old.status,
            old.last_seen,
            old.deprecated_at,
            aged.occurrences == 0,
            as_of,
        ) else {
            report.purged += 1;
            return None;
        };
        self.count_transition(old.status, status, report);
        aged.status = status;
        aged.deprecated_at = deprecated_at;
        Some(aged)
    }

    fn next_status(
        &self,
        current: LifecycleStatus,
        last_seen: DateTime<Utc>,
        deprecated_at: Option<DateTime<Utc>>,
        no_recent_occurrences: bool,
        as_of: DateTime<Utc>,
    ) -> Option<(LifecycleStatus, Option<DateTime<Utc>>)> {
        if current == LifecycleStatus::Deprecated {
            let since = deprecated_at.unwrap_or(last_seen);
            if as_of - since >= Duration::days(self.config.purge_days) {
                return None;
            }
            return Some((current, Some(since)));
        }
        let idle = as_of - last_seen;
        let target = if idle >= Duration::days(self.config.deprecate_days) {
            LifecycleStatus::Deprecated
        } else if idle >= Duration::days(self.config.needs_review_days) || no_recent_occurrences {
            LifecycleStatus::NeedsReview
        } else {
            LifecycleStatus::Active
        };
        let status = if rank(target) > rank(current) {
            target
        } else {
            current
        };
        let deprecated_at = (status == LifecycleStatus::Deprecated).then_some(as_of);
        Some((status, deprecated_at))
    }

    fn count_transition(&self, from: LifecycleStatus, to: LifecycleStatus, report: &mut LifecycleReport) {
        if from == to {
            return;
        }
        match to {
            LifecycleStatus::NeedsReview => report.needs_review += 1,
            LifecycleStatus::Deprecated => report.deprecated += 1,
            LifecycleStatus::Active => {}
        }
    }
}

fn by_id<T>(items: Vec<T>, id: impl Fn(&T) -> &String) -> BTreeMap<String, T> {
    items.into_iter().map(|item| (id(&item).clone(), item)).collect()
}
