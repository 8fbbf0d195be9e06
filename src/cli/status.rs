// src/cli/status.rs — Status display and stored-item listings

use std::path::Path;

use rusqlite::Connection;

use super::{parse_choice, print_json};
use crate::core::engine::Engine;
use crate::core::types::{LifecycleStatus, PatternType};
use crate::infra::config::Config;
use crate::infra::paths;
use crate::memory::schema;
use crate::memory::store::Store;
use crate::memory::{PatternQuery, SynergyQuery};
use crate::synergy::relationship::RelationshipType;

const STATUSES: &[&str] = &["active", "needs_review", "deprecated"];

/// Display configuration, database and calibration status.
pub async fn show_status(config: &Config, db_path: &Path, verbose: bool) -> anyhow::Result<()> {
    let db_exists = db_path.exists();
    let db_size = if db_exists {
        std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };
    let config_path = paths::config_file_path();

    println!("homeminer v{}", env!("CARGO_PKG_VERSION"));
    println!();

    if config_path.exists() {
        println!("  Config:     {} (loaded)", config_path.display());
    } else {
        println!("  Config:     (using defaults)");
    }

    if !db_exists {
        println!("  Database:   (not initialized)");
        return Ok(());
    }
    println!(
        "  Database:   {} ({})",
        db_path.display(),
        format_bytes(db_size)
    );

    match query_db_stats(db_path) {
        Ok(stats) => {
            println!("  Schema:     v{}", stats.schema_version);
            println!("  Patterns:   {}", stats.patterns);
            println!("  Synergies:  {}", stats.synergies);
            match stats.weights_version {
                Some(v) => println!("  Weights:    v{v}"),
                None => println!("  Weights:    (initial)"),
            }
            match stats.last_run {
                Some((status, at)) => println!("  Last run:   {status} at {at}"),
                None => println!("  Last run:   (never)"),
            }
        }
        Err(e) => println!("  (could not read database: {e})"),
    }

    if verbose {
        println!();
        println!("  Data dir:   {}", paths::data_dir().display());
        println!("  Config dir: {}", paths::config_dir().display());
        println!("  Window:     {} days", config.analysis.lookback_days);
        println!(
            "  Threshold:  {:.2} (top {})",
            config.quality.persistence_threshold, config.analysis.top_n
        );
        println!(
            "  Detectors:  {} workers, {}s timeout",
            config.analysis.max_workers, config.analysis.detector_timeout_secs
        );
        match &config.api {
            Some(api) if api.enabled => println!("  API:        port {}", api.port),
            _ => println!("  API:        (disabled)"),
        }
    }
    Ok(())
}

struct DbStats {
    schema_version: u32,
    patterns: i64,
    synergies: i64,
    weights_version: Option<u64>,
    last_run: Option<(String, String)>,
}

fn query_db_stats(db_path: &Path) -> anyhow::Result<DbStats> {
    let conn = Connection::open(db_path)?;
    schema::run_migrations(&conn)?;
    let schema_version = schema::current_version(&conn)?;
    let store = Store::new(conn);

    let last_run = store.query_runs(1)?.into_iter().next().map(|r| {
        (
            r.status.as_str().to_string(),
            r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    });

    Ok(DbStats {
        schema_version,
        patterns: store.count_patterns()?,
        synergies: store.count_synergies()?,
        weights_version: store.load_weights()?.map(|w| w.version),
        last_run,
    })
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1}MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{}B", bytes)
    }
}

fn parse_status(value: Option<&str>) -> anyhow::Result<Option<LifecycleStatus>> {
    value
        .map(|s| parse_choice("status", s, LifecycleStatus::parse, STATUSES))
        .transpose()
}

pub async fn list_patterns(
    engine: &Engine,
    pattern_type: Option<&str>,
    status: Option<&str>,
    device: Option<&str>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let types: Vec<&str> = PatternType::ALL.iter().map(|t| t.as_str()).collect();
    let query = PatternQuery {
        pattern_type: pattern_type
            .map(|t| parse_choice("pattern type", t, PatternType::parse, &types))
            .transpose()?,
        status: parse_status(status)?,
        exclude_deprecated: false,
        device_id: device.map(str::to_string),
        min_quality: None,
        limit: Some(limit),
    };
    let patterns = engine.persistence().get_patterns(&query).await?;
    if json {
        return print_json(&patterns);
    }
    if patterns.is_empty() {
        println!("No patterns stored.");
        return Ok(());
    }
    for p in &patterns {
        println!(
            "{:<30} {:<18} {:<12} q={:.2} n={:<4} {}",
            p.id,
            p.pattern_type.as_str(),
            p.status.as_str(),
            p.quality_score,
            p.occurrences,
            p.device_ids.join(", ")
        );
    }
    Ok(())
}

pub async fn list_synergies(
    engine: &Engine,
    relationship: Option<&str>,
    status: Option<&str>,
    entity: Option<&str>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let kinds: Vec<&str> = RelationshipType::ALL.iter().map(|r| r.as_str()).collect();
    let query = SynergyQuery {
        relationship_type: relationship
            .map(|r| parse_choice("relationship", r, RelationshipType::parse, &kinds))
            .transpose()?,
        status: parse_status(status)?,
        entity_id: entity.map(str::to_string),
        limit: Some(limit),
    };
    let synergies = engine.persistence().get_synergies(&query).await?;
    if json {
        return print_json(&synergies);
    }
    if synergies.is_empty() {
        println!("No synergies stored.");
        return Ok(());
    }
    for syn in &synergies {
        println!(
            "{:<30} {:<20} {:<12} b={:.2} {}",
            syn.id,
            syn.relationship_type.as_str(),
            syn.status.as_str(),
            syn.benefit_score,
            syn.action_chain.join(" -> ")
        );
        if !syn.explanation.rationale.is_empty() {
            println!("    {}", syn.explanation.rationale);
        }
    }
    Ok(())
}

pub async fn list_runs(engine: &Engine, limit: usize, json: bool) -> anyhow::Result<()> {
    let runs = engine.persistence().list_runs(limit).await?;
    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in &runs {
        let duration = run
            .duration_ms()
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}  {:<11} {:<10} {:>8}  {} patterns, {} synergies",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.mode.as_str(),
            run.status.as_str(),
            duration,
            run.stages.persisted_patterns,
            run.stages.persisted_synergies
        );
        if let Some(err) = &run.error {
            println!("    error: {err}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0MB");
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(
            parse_status(Some("needs_review")).unwrap(),
            Some(LifecycleStatus::NeedsReview)
        );
        assert!(parse_status(Some("retired")).is_err());
    }

    #[test]
    fn test_db_stats_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");
        let stats = query_db_stats(&path).unwrap();
        assert_eq!(stats.patterns, 0);
        assert_eq!(stats.synergies, 0);
        assert!(stats.weights_version.is_none());
        assert!(stats.last_run.is_none());
        assert!(stats.schema_version >= 1);
    }
}
