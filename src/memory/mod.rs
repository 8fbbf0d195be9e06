// src/memory/mod.rs — Persistence of patterns, synergies, scores and calibration state

pub mod lifecycle;
pub mod retry;
pub mod schema;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::history::RunRecord;
use crate::core::types::{Feedback, LifecycleStatus, Pattern, PatternType};
use crate::evaluator::drift::BaselineDistribution;
use crate::evaluator::weights::EnsembleWeights;
use crate::evaluator::QualityScore;
use crate::infra::errors::EngineError;
use crate::synergy::relationship::RelationshipType;
use crate::synergy::Synergy;
use lifecycle::LifecyclePlan;
use store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternQuery {
    pub pattern_type: Option<PatternType>,
    pub status: Option<LifecycleStatus>,
    /// Skip deprecated rows unless a status is requested explicitly.
    #[serde(default)]
    pub exclude_deprecated: bool,
    pub device_id: Option<String>,
    pub min_quality: Option<f64>,
    pub limit: Option<usize>,
}

impl PatternQuery {
    pub fn active() -> Self {
        Self {
            exclude_deprecated: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, p: &Pattern) -> bool {
        self.pattern_type.map_or(true, |t| p.pattern_type == t)
            && self.status.map_or(true, |s| p.status == s)
            && !(self.exclude_deprecated
                && self.status.is_none()
                && p.status == LifecycleStatus::Deprecated)
            && self.device_id.as_deref().map_or(true, |d| p.involves(d))
            && self.min_quality.map_or(true, |q| p.quality_score >= q)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynergyQuery {
    pub relationship_type: Option<RelationshipType>,
    pub status: Option<LifecycleStatus>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

impl SynergyQuery {
    pub fn matches(&self, s: &Synergy) -> bool {
        self.relationship_type
            .map_or(true, |r| s.relationship_type == r)
            && self.status.map_or(true, |st| s.status == st)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |e| s.action_chain.iter().any(|a| a == e))
    }
}

/// Everything one run writes, committed atomically.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub run: RunRecord,
    pub plan: LifecyclePlan,
    pub scores: Vec<QualityScore>,
    /// Newest event timestamp processed; drives the next incremental run.
    pub watermark: Option<DateTime<Utc>>,
    /// Quality scores of older runs are pruned past this many runs.
    pub score_retention_runs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub patterns_upserted: usize,
    pub synergies_upserted: usize,
    pub patterns_purged: usize,
    pub synergies_purged: usize,
    pub scores_recorded: usize,
    pub scores_pruned: usize,
}

/// Feedback joined with the scores it refers to, for rebuilding the
/// calibration loop in a fresh process.
#[derive(Debug, Clone, Default)]
pub struct CalibrationHistory {
    pub scores: Vec<QualityScore>,
    pub feedback: Vec<Feedback>,
}

/// Storage collaborator used by the scheduler, CLI and API.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn upsert_patterns(&self, patterns: &[Pattern]) -> Result<usize, EngineError>;
    async fn upsert_synergies(&self, synergies: &[Synergy]) -> Result<usize, EngineError>;
    /// Non-deprecated patterns matching the query.
    async fn get_active_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError>;
    async fn get_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError>;
    async fn get_synergies(&self, query: &SynergyQuery) -> Result<Vec<Synergy>, EngineError>;
    async fn record_feedback(&self, feedback: &Feedback) -> Result<(), EngineError>;
    async fn calibration_history(&self, limit: usize) -> Result<CalibrationHistory, EngineError>;
    async fn commit_run(&self, commit: &RunCommit) -> Result<CommitSummary, EngineError>;
    async fn apply_lifecycle(&self, plan: &LifecyclePlan) -> Result<CommitSummary, EngineError>;
    async fn load_weights(&self) -> Result<Option<EnsembleWeights>, EngineError>;
    async fn save_weights(&self, weights: &EnsembleWeights) -> Result<(), EngineError>;
    async fn load_baseline(&self) -> Result<Option<BaselineDistribution>, EngineError>;
    async fn save_baseline(&self, baseline: &BaselineDistribution) -> Result<(), EngineError>;
    async fn recent_composites(&self, limit: usize) -> Result<Vec<f64>, EngineError>;
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>, EngineError>;
    async fn record_run(&self, run: &RunRecord) -> Result<(), EngineError>;
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError>;
}

/// SQLite-backed persistence owning the connection.
#[derive(Clone)]
pub struct SqlitePersistence {
    store: Arc<Mutex<Store>>,
}

impl SqlitePersistence {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self::from_store(Store::new(conn)))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self::from_store(Store::new(conn)))
    }

    pub fn from_store(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&Store) -> anyhow::Result<T>,
    ) -> Result<T, EngineError> {
        let guard: MutexGuard<'_, Store> = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&guard).map_err(EngineError::persistence)
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn upsert_patterns(&self, patterns: &[Pattern]) -> Result<usize, EngineError> {
        self.with_store(|s| {
            for p in patterns {
                s.upsert_pattern(p)?;
            }
            Ok(patterns.len())
        })
    }

    async fn upsert_synergies(&self, synergies: &[Synergy]) -> Result<usize, EngineError> {
        self.with_store(|s| {
            for syn in synergies {
                s.upsert_synergy(syn)?;
            }
            Ok(synergies.len())
        })
    }

    async fn get_active_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        let query = PatternQuery {
            exclude_deprecated: true,
            ..query.clone()
        };
        self.with_store(|s| {
            Ok(s.query_patterns(&query)?
                .into_iter()
                .filter(|p| p.status != LifecycleStatus::Deprecated)
                .collect())
        })
    }

    async fn get_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>, EngineError> {
        self.with_store(|s| s.query_patterns(query))
    }

    async fn get_synergies(&self, query: &SynergyQuery) -> Result<Vec<Synergy>, EngineError> {
        self.with_store(|s| s.query_synergies(query))
    }

    async fn record_feedback(&self, feedback: &Feedback) -> Result<(), EngineError> {
        self.with_store(|s| s.insert_feedback(feedback))
    }

    async fn calibration_history(&self, limit: usize) -> Result<CalibrationHistory, EngineError> {
        self.with_store(|s| {
            let mut feedback = s.query_feedback(limit)?;
            feedback.reverse();
            let mut ids: Vec<String> = feedback.iter().map(|f| f.target_id.clone()).collect();
            ids.sort();
            ids.dedup();
            Ok(CalibrationHistory {
                scores: s.latest_scores(&ids)?,
                feedback,
            })
        })
    }

    async fn commit_run(&self, commit: &RunCommit) -> Result<CommitSummary, EngineError> {
        self.with_store(|s| s.commit_run(commit))
    }

    async fn apply_lifecycle(&self, plan: &LifecyclePlan) -> Result<CommitSummary, EngineError> {
        self.with_store(|s| s.apply_lifecycle(plan))
    }

    async fn load_weights(&self) -> Result<Option<EnsembleWeights>, EngineError> {
        self.with_store(|s| s.load_weights())
    }

    async fn save_weights(&self, weights: &EnsembleWeights) -> Result<(), EngineError> {
        self.with_store(|s| s.save_weights(weights))
    }

    async fn load_baseline(&self) -> Result<Option<BaselineDistribution>, EngineError> {
        self.with_store(|s| s.load_baseline())
    }

    async fn save_baseline(&self, baseline: &BaselineDistribution) -> Result<(), EngineError> {
        self.with_store(|s| s.save_baseline(baseline))
    }

    async fn recent_composites(&self, limit: usize) -> Result<Vec<f64>, EngineError> {
        self.with_store(|s| s.recent_composites(limit))
    }

    async fn watermark(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.with_store(|s| s.watermark())
    }

    async fn record_run(&self, run: &RunRecord) -> Result<(), EngineError> {
        self.with_store(|s| s.upsert_run(run))
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError> {
        self.with_store(|s| s.query_runs(limit))
    }
}
