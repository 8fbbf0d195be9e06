// src/core/history.rs — Run records for observability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::evaluator::drift::DriftReport;
use crate::memory::lifecycle::LifecycleReport;
use crate::patterns::{DedupStats, DetectorFailure, FilterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Incremental run with no new events.
    Skipped,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Candidate counts after each pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub events: usize,
    pub detected: usize,
    pub filtered: usize,
    pub deduplicated: usize,
    pub corroborated: usize,
    pub above_threshold: usize,
    pub persisted_patterns: usize,
    pub synergy_edges: usize,
    pub persisted_synergies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub status: RunStatus,
    pub as_of: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub weights_version: u64,
    #[serde(default)]
    pub stages: StageCounts,
    #[serde(default)]
    pub filter: FilterStats,
    #[serde(default)]
    pub dedup: DedupStats,
    #[serde(default)]
    pub failures: Vec<DetectorFailure>,
    #[serde(default)]
    pub drift: Option<DriftReport>,
    #[serde(default)]
    pub lifecycle: Option<LifecycleReport>,
    #[serde(default)]
    pub enrichment_degraded: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn start(run_id: Uuid, mode: RunMode, as_of: DateTime<Utc>, weights_version: u64) -> Self {
        Self {
            run_id,
            mode,
            status: RunStatus::Succeeded,
            as_of,
            started_at: Utc::now(),
            finished_at: None,
            weights_version,
            stages: StageCounts::default(),
            filter: FilterStats::default(),
            dedup: DedupStats::default(),
            failures: Vec::new(),
            drift: None,
            lifecycle: None,
            enrichment_degraded: false,
            error: None,
        }
    }

    pub fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.finish(RunStatus::Failed)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds())
    }
}

/// In-process ring of recent runs, newest last.
#[derive(Debug)]
pub struct RunHistory {
    capacity: usize,
    runs: VecDeque<RunRecord>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            runs: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: RunRecord) {
        if self.runs.len() == self.capacity {
            self.runs.pop_front();
        }
        self.runs.push_back(record);
    }

    pub fn latest(&self) -> Option<&RunRecord> {
        self.runs.back()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<RunRecord> {
        self.runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
