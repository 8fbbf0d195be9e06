// src/memory/store.rs — SQLite operations

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::lifecycle::LifecyclePlan;
use super::{CommitSummary, PatternQuery, RunCommit, SynergyQuery};
use crate::core::history::RunRecord;
use crate::core::types::{
    Feedback, FeedbackAction, LifecycleStatus, Pattern, PatternType, TargetType,
};
use crate::evaluator::drift::BaselineDistribution;
use crate::evaluator::weights::EnsembleWeights;
use crate::evaluator::QualityScore;
use crate::synergy::relationship::RelationshipType;
use crate::synergy::Synergy;

const WATERMARK_KEY: &str = "incremental_watermark";

/// Low-level SQLite operations for all persisted types.
pub struct Store {
    conn: Connection,
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp '{s}'"))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_status(s: &str) -> anyhow::Result<LifecycleStatus> {
    LifecycleStatus::parse(s).with_context(|| format!("unknown status '{s}'"))
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Patterns --

    pub fn upsert_pattern(&self, pattern: &Pattern) -> anyhow::Result<()> {
        upsert_pattern(&self.conn, pattern)
    }

    pub fn get_pattern(&self, id: &str) -> anyhow::Result<Option<Pattern>> {
        let row = self
            .conn
            .query_row(
                &format!("{PATTERN_SELECT} WHERE id = ?1"),
                params![id],
                PatternRow::from_row,
            )
            .optional()?;
        row.map(Pattern::try_from).transpose()
    }

    pub fn query_patterns(&self, query: &PatternQuery) -> anyhow::Result<Vec<Pattern>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PATTERN_SELECT} ORDER BY quality_score DESC, id"))?;
        let rows = stmt.query_map([], PatternRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            let pattern = Pattern::try_from(row?)?;
            if query.matches(&pattern) {
                result.push(pattern);
            }
            if query.limit.is_some_and(|l| result.len() >= l) {
                break;
            }
        }
        Ok(result)
    }

    pub fn count_patterns(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |r| r.get(0))?)
    }

    // -- Synergies --

    pub fn upsert_synergy(&self, synergy: &Synergy) -> anyhow::Result<()> {
        upsert_synergy(&self.conn, synergy)
    }

    pub fn query_synergies(&self, query: &SynergyQuery) -> anyhow::Result<Vec<Synergy>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trigger_entity, action_chain, relationship_type, benefit_score,
             confidence, supporting_pattern_ids, status, first_seen, last_seen,
             deprecated_at, explanation
             FROM synergies ORDER BY benefit_score DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SynergyRow {
                id: row.get(0)?,
                trigger_entity: row.get(1)?,
                action_chain: row.get(2)?,
                relationship_type: row.get(3)?,
                benefit_score: row.get(4)?,
                confidence: row.get(5)?,
                supporting_pattern_ids: row.get(6)?,
                status: row.get(7)?,
                first_seen: row.get(8)?,
                last_seen: row.get(9)?,
                deprecated_at: row.get(10)?,
                explanation: row.get(11)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            let synergy = Synergy::try_from(row?)?;
            if query.matches(&synergy) {
                result.push(synergy);
            }
            if query.limit.is_some_and(|l| result.len() >= l) {
                break;
            }
        }
        Ok(result)
    }

    pub fn count_synergies(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM synergies", [], |r| r.get(0))?)
    }

    // -- Quality scores --

    pub fn insert_quality_score(&self, run_id: Uuid, score: &QualityScore) -> anyhow::Result<()> {
        insert_quality_score(&self.conn, run_id, score)
    }

    /// Composite scores of the most recent runs, newest first.
    pub fn recent_composites(&self, limit: usize) -> anyhow::Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT composite FROM quality_scores ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |r| r.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -- Feedback --

    pub fn insert_feedback(&self, feedback: &Feedback) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO feedback (target_id, target_type, action, reward, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback.target_id,
                feedback.target_type.as_str(),
                feedback.action.as_str(),
                feedback.reward,
                ts(&feedback.timestamp)
            ],
        )?;
        Ok(())
    }

    pub fn query_feedback(&self, limit: usize) -> anyhow::Result<Vec<Feedback>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, target_type, action, reward, timestamp
             FROM feedback ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (target_id, target_type, action, reward, timestamp) = row?;
            result.push(Feedback {
                target_id,
                target_type: TargetType::parse(&target_type)
                    .with_context(|| format!("unknown target type '{target_type}'"))?,
                action: FeedbackAction::parse(&action)
                    .with_context(|| format!("unknown feedback action '{action}'"))?,
                reward,
                timestamp: parse_ts(&timestamp)?,
            });
        }
        Ok(result)
    }

    /// Latest score recorded per target, for joining feedback in a fresh process.
    pub fn latest_scores(&self, target_ids: &[String]) -> anyhow::Result<Vec<QualityScore>> {
        let mut stmt = self.conn.prepare(
            "SELECT body FROM quality_scores WHERE target_id = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut result = Vec::new();
        for id in target_ids {
            let body: Option<String> = stmt.query_row(params![id], |r| r.get(0)).optional()?;
            if let Some(body) = body {
                result.push(serde_json::from_str(&body)?);
            }
        }
        Ok(result)
    }

    // -- Weights --

    pub fn save_weights(&self, weights: &EnsembleWeights) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO ensemble_weights (version, body, updated_at)
             VALUES (?1, ?2, ?3)",
            params![
                weights.version as i64,
                serde_json::to_string(weights)?,
                ts(&weights.last_updated)
            ],
        )?;
        Ok(())
    }

    pub fn load_weights(&self) -> anyhow::Result<Option<EnsembleWeights>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM ensemble_weights ORDER BY version DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    // -- Baseline --

    pub fn save_baseline(&self, baseline: &BaselineDistribution) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO baseline (id, body, captured_at) VALUES (1, ?1, ?2)",
            params![serde_json::to_string(baseline)?, ts(&baseline.captured_at)],
        )?;
        Ok(())
    }

    pub fn load_baseline(&self) -> anyhow::Result<Option<BaselineDistribution>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM baseline WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    // -- Runs --

    pub fn upsert_run(&self, run: &RunRecord) -> anyhow::Result<()> {
        upsert_run(&self.conn, run)
    }

    /// Newest first.
    pub fn query_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM runs ORDER BY started_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |r| r.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    // -- Meta --

    pub fn watermark(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![WATERMARK_KEY],
                |r| r.get(0),
            )
            .optional()?;
        parse_opt_ts(value)
    }

    // -- Transactions --

    /// Write everything a run produced in one transaction; nothing is
    /// visible unless all of it is.
    pub fn commit_run(&self, commit: &RunCommit) -> anyhow::Result<CommitSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let mut summary = apply_plan(&tx, &commit.plan)?;
        for score in &commit.scores {
            insert_quality_score(&tx, commit.run.run_id, score)?;
        }
        summary.scores_recorded = commit.scores.len();
        summary.scores_pruned = prune_quality_scores(&tx, commit.score_retention_runs)?;
        if let Some(watermark) = &commit.watermark {
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![WATERMARK_KEY, ts(watermark)],
            )?;
        }
        upsert_run(&tx, &commit.run)?;
        tx.commit()?;
        Ok(summary)
    }

    pub fn apply_lifecycle(&self, plan: &LifecyclePlan) -> anyhow::Result<CommitSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let summary = apply_plan(&tx, plan)?;
        tx.commit()?;
        Ok(summary)
    }
}

fn apply_plan(conn: &Connection, plan: &LifecyclePlan) -> anyhow::Result<CommitSummary> {
    for pattern in &plan.patterns {
        upsert_pattern(conn, pattern)?;
    }
    for synergy in &plan.synergies {
        upsert_synergy(conn, synergy)?;
    }
    let mut purged_patterns = 0;
    for id in &plan.purge_patterns {
        purged_patterns += conn.execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
    }
    let mut purged_synergies = 0;
    for id in &plan.purge_synergies {
        purged_synergies += conn.execute("DELETE FROM synergies WHERE id = ?1", params![id])?;
    }
    Ok(CommitSummary {
        patterns_upserted: plan.patterns.len(),
        synergies_upserted: plan.synergies.len(),
        patterns_purged: purged_patterns,
        synergies_purged: purged_synergies,
        scores_recorded: 0,
        scores_pruned: 0,
    })
}

fn upsert_pattern(conn: &Connection, p: &Pattern) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO patterns (id, pattern_type, device_ids, occurrences, confidence,
         quality_score, status, first_seen, last_seen, deprecated_at, occurrence_days, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
             occurrences = excluded.occurrences,
             confidence = excluded.confidence,
             quality_score = excluded.quality_score,
             status = excluded.status,
             first_seen = excluded.first_seen,
             last_seen = excluded.last_seen,
             deprecated_at = excluded.deprecated_at,
             occurrence_days = excluded.occurrence_days,
             metadata = excluded.metadata",
        params![
            p.id,
            p.pattern_type.as_str(),
            serde_json::to_string(&p.device_ids)?,
            p.occurrences,
            p.confidence,
            p.quality_score,
            p.status.as_str(),
            ts(&p.first_seen),
            ts(&p.last_seen),
            p.deprecated_at.as_ref().map(ts),
            serde_json::to_string(&p.occurrence_days)?,
            serde_json::to_string(&p.metadata)?
        ],
    )?;
    Ok(())
}

fn upsert_synergy(conn: &Connection, s: &Synergy) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO synergies (id, trigger_entity, action_chain, relationship_type,
         benefit_score, confidence, supporting_pattern_ids, status, first_seen, last_seen,
         deprecated_at, explanation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
             benefit_score = excluded.benefit_score,
             confidence = excluded.confidence,
             supporting_pattern_ids = excluded.supporting_pattern_ids,
             status = excluded.status,
             first_seen = excluded.first_seen,
             last_seen = excluded.last_seen,
             deprecated_at = excluded.deprecated_at,
             explanation = excluded.explanation",
        params![
            s.id,
            s.trigger_entity,
            serde_json::to_string(&s.action_chain)?,
            s.relationship_type.as_str(),
            s.benefit_score,
            s.confidence,
            serde_json::to_string(&s.supporting_pattern_ids)?,
            s.status.as_str(),
            ts(&s.first_seen),
            ts(&s.last_seen),
            s.deprecated_at.as_ref().map(ts),
            serde_json::to_string(&s.explanation)?
        ],
    )?;
    Ok(())
}

/// Drop scores of every run older than the newest `keep_runs`. The latest
/// score of a target with feedback survives so calibration can be rebuilt.
fn prune_quality_scores(conn: &Connection, keep_runs: usize) -> anyhow::Result<usize> {
    let pruned = conn.execute(
        "DELETE FROM quality_scores
         WHERE run_id NOT IN (
             SELECT run_id FROM quality_scores GROUP BY run_id ORDER BY MAX(id) DESC LIMIT ?1
         )
         AND id NOT IN (
             SELECT MAX(id) FROM quality_scores
             WHERE target_id IN (SELECT target_id FROM feedback)
             GROUP BY target_id
         )",
        params![keep_runs.max(1) as i64],
    )?;
    Ok(pruned)
}

fn insert_quality_score(conn: &Connection, run_id: Uuid, score: &QualityScore) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO quality_scores (run_id, target_id, pattern_type, composite, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run_id.to_string(),
            score.target_id,
            score.pattern_type.as_str(),
            score.composite,
            serde_json::to_string(score)?,
            ts(&Utc::now())
        ],
    )?;
    Ok(())
}

fn upsert_run(conn: &Connection, run: &RunRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO runs (run_id, mode, status, started_at, finished_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id.to_string(),
            run.mode.as_str(),
            run.status.as_str(),
            ts(&run.started_at),
            run.finished_at.as_ref().map(ts),
            serde_json::to_string(run)?
        ],
    )?;
    Ok(())
}

const PATTERN_SELECT: &str = "SELECT id, pattern_type, device_ids, occurrences, confidence,
    quality_score, status, first_seen, last_seen, deprecated_at, occurrence_days, metadata
    FROM patterns";

#[derive(Debug, Clone)]
pub struct PatternRow {
    pub id: String,
    pub pattern_type: String,
    pub device_ids: String,
    pub occurrences: u32,
    pub confidence: f64,
    pub quality_score: f64,
    pub status: String,
    pub first_seen: String,
    pub last_seen: String,
    pub deprecated_at: Option<String>,
    pub occurrence_days: String,
    pub metadata: String,
}

impl PatternRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pattern_type: row.get(1)?,
            device_ids: row.get(2)?,
            occurrences: row.get(3)?,
            confidence: row.get(4)?,
            quality_score: row.get(5)?,
            status: row.get(6)?,
            first_seen: row.get(7)?,
            last_seen: row.get(8)?,
            deprecated_at: row.get(9)?,
            occurrence_days: row.get(10)?,
            metadata: row.get(11)?,
        })
    }
}

impl TryFrom<PatternRow> for Pattern {
    type Error = anyhow::Error;

    fn try_from(row: PatternRow) -> anyhow::Result<Self> {
        Ok(Pattern {
            pattern_type: PatternType::parse(&row.pattern_type)
                .with_context(|| format!("unknown pattern type '{}'", row.pattern_type))?,
            device_ids: serde_json::from_str(&row.device_ids)?,
            occurrences: row.occurrences,
            confidence: row.confidence,
            quality_score: row.quality_score,
            status: parse_status(&row.status)?,
            first_seen: parse_ts(&row.first_seen)?,
            last_seen: parse_ts(&row.last_seen)?,
            deprecated_at: parse_opt_ts(row.deprecated_at)?,
            occurrence_days: serde_json::from_str(&row.occurrence_days)?,
            metadata: serde_json::from_str(&row.metadata)?,
            id: row.id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SynergyRow {
    pub id: String,
    pub trigger_entity: String,
    pub action_chain: String,
    pub relationship_type: String,
    pub benefit_score: f64,
    pub confidence: f64,
    pub supporting_pattern_ids: String,
    pub status: String,
    pub first_seen: String,
    pub last_seen: String,
    pub deprecated_at: Option<String>,
    pub explanation: String,
}

impl TryFrom<SynergyRow> for Synergy {
    type Error = anyhow::Error;

    fn try_from(row: SynergyRow) -> anyhow::Result<Self> {
        Ok(Synergy {
            relationship_type: RelationshipType::parse(&row.relationship_type).with_context(
                || format!("unknown relationship type '{}'", row.relationship_type),
            )?,
            action_chain: serde_json::from_str(&row.action_chain)?,
            benefit_score: row.benefit_score,
            confidence: row.confidence,
            supporting_pattern_ids: serde_json::from_str(&row.supporting_pattern_ids)?,
            status: parse_status(&row.status)?,
            first_seen: parse_ts(&row.first_seen)?,
            last_seen: parse_ts(&row.last_seen)?,
            deprecated_at: parse_opt_ts(row.deprecated_at)?,
            explanation: serde_json::from_str(&row.explanation)?,
            trigger_entity: row.trigger_entity,
            id: row.id,
        })
    }
}
