// src/cli/feedback.rs — Feedback, recalibration and drift commands

use super::{parse_choice, print_json, BaselineAction};
use crate::core::engine::Engine;
use crate::core::types::{Feedback, FeedbackAction, TargetType};
use crate::evaluator::calibration::TierStats;
use crate::infra::errors::EngineError;

const ACTIONS: &[&str] = &["accept", "reject", "modify", "deploy", "disable"];

/// Guess the target type from the id prefix.
fn infer_target_type(target_id: &str) -> TargetType {
    if target_id.starts_with("syn_") {
        TargetType::Synergy
    } else {
        TargetType::Pattern
    }
}

/// Build a feedback entry from raw CLI arguments.
pub fn build_feedback(
    target_id: &str,
    action: &str,
    target_type: Option<&str>,
    reward: Option<f64>,
) -> anyhow::Result<Feedback> {
    if target_id.trim().is_empty() {
        anyhow::bail!("target id must not be empty");
    }
    let action = parse_choice("action", action, FeedbackAction::parse, ACTIONS)?;
    let target_type = match target_type {
        Some(t) => parse_choice("target type", t, TargetType::parse, &["pattern", "synergy"])?,
        None => infer_target_type(target_id),
    };
    let mut feedback = Feedback::new(target_id, target_type, action);
    if let Some(r) = reward {
        if !(-1.0..=1.0).contains(&r) {
            anyhow::bail!("reward must be within [-1, 1], got {r}");
        }
        feedback.reward = r;
    }
    Ok(feedback)
}

pub async fn run_feedback(engine: &Engine, feedback: Feedback, json: bool) -> anyhow::Result<()> {
    let used = engine.submit_feedback(&feedback).await?;
    if json {
        return print_json(&serde_json::json!({
            "feedback": feedback,
            "used_for_calibration": used,
        }));
    }
    println!(
        "Recorded {} on {} {} (reward {:+.2})",
        feedback.action.as_str(),
        feedback.target_type.as_str(),
        feedback.target_id,
        feedback.reward
    );
    if !used {
        println!("  No quality score known for this target; kept in the log only.");
    }
    Ok(())
}

pub async fn run_recalibrate(engine: &Engine, json: bool) -> anyhow::Result<()> {
    match engine.recalibrate().await {
        Ok(weights) => {
            if json {
                return print_json(&weights);
            }
            let c = &weights.components;
            let m = &weights.models;
            println!("Weights updated to v{}", weights.version);
            println!(
                "  Components:   actionability {:.3}, consistency {:.3}, frequency {:.3}, recency {:.3}, automation {:.3}",
                c.actionability, c.consistency, c.frequency, c.recency, c.automation_potential
            );
            println!(
                "  Models:       base {:.3}, calibrated {:.3}, rl {:.3}",
                m.base, m.calibrated, m.rl
            );
            Ok(())
        }
        Err(EngineError::CalibrationDataInsufficient { samples, required }) => {
            if json {
                return print_json(&serde_json::json!({
                    "updated": false,
                    "samples": samples,
                    "required": required,
                }));
            }
            println!("Weights unchanged: {samples} of {required} feedback samples collected.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run_baseline(engine: &Engine, action: BaselineAction, json: bool) -> anyhow::Result<()> {
    let baseline = match action {
        BaselineAction::Capture => Some(engine.capture_baseline().await?),
        BaselineAction::Show => engine.persistence().load_baseline().await?,
    };
    if json {
        return print_json(&baseline);
    }
    match baseline {
        Some(b) => {
            println!("Baseline captured {}", b.captured_at.to_rfc3339());
            println!("  Samples:      {}", b.count);
            println!("  Mean:         {:.3} (sd {:.3})", b.mean, b.std_dev);
        }
        None => println!("No baseline captured yet. Run `homeminer baseline capture`."),
    }
    Ok(())
}

pub async fn run_drift(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let report = engine.check_drift().await?;
    if json {
        return print_json(&report);
    }
    let verdict = if report.drifted { "DRIFTED" } else { "stable" };
    println!("Quality distribution: {verdict}");
    println!("  Samples:      {}", report.sample_count);
    println!("  PSI:          {:.4}", report.magnitude);
    println!("  Mean shift:   {:+.4}", report.mean_shift);
    if let Some(p) = report.p_value {
        println!("  p-value:      {p:.4}");
    }
    println!("  {}", report.explanation);

    let tiers = engine.tier_report();
    println!();
    println!("  Acceptance by tier:");
    for (name, stats) in [("high", tiers.high), ("medium", tiers.medium), ("low", tiers.low)] {
        println!("    {name:<7} {}", format_tier(&stats));
    }
    Ok(())
}

fn format_tier(stats: &TierStats) -> String {
    if stats.total == 0 {
        return "no feedback".into();
    }
    format!(
        "{}/{} accepted ({:.0}%)",
        stats.accepted,
        stats.total,
        stats.acceptance_rate * 100.0
    )
}
