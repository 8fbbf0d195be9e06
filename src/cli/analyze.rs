// src/cli/analyze.rs — One-shot analysis and lifecycle passes

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::print_json;
use crate::core::engine::Engine;
use crate::core::history::RunStatus;
use crate::core::scheduler::{RunReport, RunRequest};
use crate::memory::lifecycle::LifecycleReport;

/// Run one analysis. Ctrl-C cancels the run before it commits.
pub async fn run_analyze(
    engine: &Engine,
    incremental: bool,
    as_of: Option<DateTime<Utc>>,
    json: bool,
) -> anyhow::Result<()> {
    let as_of = as_of.unwrap_or_else(Utc::now);
    let request = if incremental {
        RunRequest::incremental(as_of)
    } else {
        RunRequest::full(as_of)
    };

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling run...");
                cancel.cancel();
            }
        })
    };
    let result = engine.analyze(request, cancel).await;
    watcher.abort();

    let report = result?;
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let record = &report.record;
    println!(
        "Run {} ({}) {}",
        record.run_id,
        record.mode.as_str(),
        record.status.as_str()
    );
    if let Some(ms) = record.duration_ms() {
        println!("  Duration:     {ms}ms");
    }
    if record.status == RunStatus::Skipped {
        println!("  No new events since the last run.");
        return;
    }

    let s = &record.stages;
    println!("  Events:       {}", s.events);
    println!(
        "  Candidates:   {} detected, {} after filter, {} after dedup ({} corroborated)",
        s.detected, s.filtered, s.deduplicated, s.corroborated
    );
    println!(
        "  Patterns:     {} above threshold, {} persisted",
        s.above_threshold, s.persisted_patterns
    );
    println!(
        "  Synergies:    {} edges, {} persisted",
        s.synergy_edges, s.persisted_synergies
    );
    println!("  Weights:      v{}", record.weights_version);
    if record.enrichment_degraded {
        println!("  Context:      unavailable (synergies scored without boosts)");
    }
    for failure in &record.failures {
        println!(
            "  ! detector {} failed: {}",
            failure.detector.as_str(),
            failure.message
        );
    }
    if let Some(drift) = &record.drift {
        if drift.drifted {
            println!(
                "  ! quality drift (psi {:.3}): {}",
                drift.magnitude, drift.explanation
            );
        }
    }
    if let Some(lifecycle) = &record.lifecycle {
        print_lifecycle(lifecycle);
    }

    if !report.patterns.is_empty() {
        println!();
        println!("  Top patterns:");
        for p in &report.patterns {
            println!(
                "    {:<30} {:<18} q={:.2} n={:<4} {}",
                p.id,
                p.pattern_type.as_str(),
                p.quality_score,
                p.occurrences,
                p.device_ids.join(", ")
            );
        }
    }
    if !report.synergies.is_empty() {
        println!();
        println!("  Top synergies:");
        for syn in &report.synergies {
            println!(
                "    {:<30} {:<20} b={:.2} {}",
                syn.id,
                syn.relationship_type.as_str(),
                syn.benefit_score,
                syn.action_chain.join(" -> ")
            );
        }
    }
}

/// Standalone lifecycle pass over everything persisted.
pub async fn run_lifecycle(
    engine: &Engine,
    as_of: Option<DateTime<Utc>>,
    json: bool,
) -> anyhow::Result<()> {
    let report = engine.run_lifecycle(as_of.unwrap_or_else(Utc::now)).await?;
    if json {
        return print_json(&report);
    }
    println!("Lifecycle pass complete.");
    print_lifecycle(&report);
    Ok(())
}

fn print_lifecycle(r: &LifecycleReport) {
    println!(
        "  Lifecycle:    {} created, {} refreshed, {} reactivated, {} trimmed",
        r.created, r.refreshed, r.reactivated, r.trimmed
    );
    println!(
        "                {} needs review, {} deprecated, {} purged",
        r.needs_review, r.deprecated, r.purged
    );
}
