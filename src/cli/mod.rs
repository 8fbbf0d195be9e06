// src/cli/mod.rs — CLI definition (clap derive)

pub mod analyze;
pub mod feedback;
pub mod migrate;
pub mod serve;
pub mod status;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::engine::Engine;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::memory::retry::RetryPersistence;
use crate::memory::{Persistence, SqlitePersistence};
use crate::provider::jsonl::{JsonContextFile, JsonlEventSource};
use crate::provider::{ContextProvider, EventWindowProvider, StaticEventSource};

#[derive(Parser)]
#[command(
    name = "homeminer",
    about = "Mine device usage patterns and automation synergies from home event history",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database path (defaults to the data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one analysis pass over an event log
    Analyze {
        /// Event log (JSON lines, one state change per line)
        #[arg(long)]
        events: PathBuf,
        /// Only re-examine devices with events after the last watermark
        #[arg(long)]
        incremental: bool,
        /// Analysis time (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Context snapshot (JSON) used to boost synergies
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Record user feedback on a pattern or synergy
    Feedback {
        /// Pattern or synergy id
        target_id: String,
        /// accept, reject, modify, deploy or disable
        #[arg(long)]
        action: String,
        /// pattern or synergy; inferred from the id prefix when omitted
        #[arg(long)]
        target_type: Option<String>,
        /// Explicit reward in [-1, 1]; defaults to the action's reward
        #[arg(long)]
        reward: Option<f64>,
    },
    /// Learn new ensemble weights from recorded feedback
    Recalibrate,
    /// Capture or show the drift baseline
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
    /// Compare recent quality scores with the baseline
    Drift,
    /// Age, deprecate and purge stored patterns and synergies
    Lifecycle {
        /// Reference time (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// List stored patterns
    Patterns {
        /// Filter by pattern type (e.g. co_occurrence)
        #[arg(long = "type")]
        pattern_type: Option<String>,
        /// Filter by status (active, needs_review, deprecated)
        #[arg(long)]
        status: Option<String>,
        /// Only patterns involving this device
        #[arg(long)]
        device: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// List stored synergies
    Synergies {
        /// Filter by relationship (e.g. motion_to_light)
        #[arg(long)]
        relationship: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Only synergies whose chain contains this entity
        #[arg(long)]
        entity: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show recent runs
    Runs {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Show configuration, database and calibration status
    Status {
        /// Show detailed breakdown
        #[arg(long)]
        verbose: bool,
    },
    /// Serve the HTTP API, optionally running incremental analyses on a timer
    Serve {
        /// Event log used for scheduled analyses
        #[arg(long)]
        events: Option<PathBuf>,
        /// Minutes between scheduled incremental analyses (requires --events)
        #[arg(long, requires = "events")]
        every: Option<u64>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show schema status or roll back migrations
    Migrate {
        #[arg(long)]
        status: bool,
        /// Roll back to this schema version
        #[arg(long)]
        rollback: Option<u32>,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum BaselineAction {
    /// Snapshot the current score distribution as the new baseline
    Capture,
    /// Print the stored baseline
    Show,
}

/// Load config from `--config` or the default location.
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::load_from(Path::new(p)),
        None => Config::load(),
    }
}

/// Resolve the database path, creating its directory when needed.
pub async fn resolve_db(db: Option<&Path>) -> anyhow::Result<PathBuf> {
    match db {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Ok(p.to_path_buf())
        }
        None => {
            paths::ensure_dirs().await?;
            Ok(paths::db_path())
        }
    }
}

/// Open the store wrapped in retry, and build an engine over it.
pub async fn open_engine(
    config: Config,
    db: &Path,
    events: Option<&Path>,
    context: Option<&Path>,
) -> anyhow::Result<Engine> {
    let sqlite: Arc<dyn Persistence> = Arc::new(SqlitePersistence::open(db)?);
    let persistence: Arc<dyn Persistence> = Arc::new(RetryPersistence::with_config(
        sqlite,
        config.retry.clone().into(),
    ));
    let events: Arc<dyn EventWindowProvider> = match events {
        Some(path) => Arc::new(JsonlEventSource::new(path)),
        None => Arc::new(StaticEventSource::default()),
    };
    let context: Option<Arc<dyn ContextProvider>> =
        context.map(|p| Arc::new(JsonContextFile::new(p)) as Arc<dyn ContextProvider>);
    Ok(Engine::open(config, events, persistence, context).await?)
}

/// Parse a lowercase enum value, listing the accepted spellings on failure.
pub(crate) fn parse_choice<T>(
    what: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
    choices: &[&str],
) -> anyhow::Result<T> {
    parse(value).ok_or_else(|| {
        anyhow::anyhow!("unknown {what} '{value}' (expected one of: {})", choices.join(", "))
    })
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "homeminer",
            "analyze",
            "--events",
            "events.jsonl",
            "--incremental",
            "--as-of",
            "2026-01-31T00:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze {
                events,
                incremental,
                as_of,
                context,
            } => {
                assert_eq!(events, PathBuf::from("events.jsonl"));
                assert!(incremental);
                assert!(as_of.is_some());
                assert!(context.is_none());
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_feedback_with_global_flags() {
        let cli = Cli::try_parse_from([
            "homeminer",
            "feedback",
            "pat_0123",
            "--action",
            "accept",
            "--json",
            "--db",
            "/tmp/x.db",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(cli.command, Commands::Feedback { ref action, .. } if action == "accept"));
    }

    #[test]
    fn test_serve_interval_requires_events() {
        assert!(Cli::try_parse_from(["homeminer", "serve", "--every", "15"]).is_err());
        let cli = Cli::try_parse_from([
            "homeminer",
            "serve",
            "--events",
            "e.jsonl",
            "--every",
            "15",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Serve { every: Some(15), .. }));
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let result = Cli::try_parse_from([
            "homeminer",
            "lifecycle",
            "--as-of",
            "yesterday",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_choice_lists_options() {
        let err = parse_choice("action", "maybe", |_| None::<u8>, &["accept", "reject"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("accept, reject"));
    }
}
