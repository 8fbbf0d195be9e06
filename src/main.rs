// src/main.rs — homeminer entry point

use clap::Parser;
use std::time::Duration;

use homeminer::cli::{self, Cli, Commands};
use homeminer::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = cli::load_config(cli.config.as_deref())?;
    let db = cli::resolve_db(cli.db.as_deref()).await?;
    let json = cli.json;

    // Commands that don't need an engine
    match &cli.command {
        Commands::Status { verbose } => {
            return cli::status::show_status(&config, &db, *verbose).await;
        }
        Commands::Migrate { status, rollback } => {
            return cli::migrate::run_migrate(&db, *status, *rollback).await;
        }
        _ => {}
    }

    match cli.command {
        Commands::Analyze {
            events,
            incremental,
            as_of,
            context,
        } => {
            let engine =
                cli::open_engine(config, &db, Some(events.as_path()), context.as_deref()).await?;
            cli::analyze::run_analyze(&engine, incremental, as_of, json).await
        }
        Commands::Feedback {
            target_id,
            action,
            target_type,
            reward,
        } => {
            let feedback =
                cli::feedback::build_feedback(&target_id, &action, target_type.as_deref(), reward)?;
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::feedback::run_feedback(&engine, feedback, json).await
        }
        Commands::Recalibrate => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::feedback::run_recalibrate(&engine, json).await
        }
        Commands::Baseline { action } => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::feedback::run_baseline(&engine, action, json).await
        }
        Commands::Drift => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::feedback::run_drift(&engine, json).await
        }
        Commands::Lifecycle { as_of } => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::analyze::run_lifecycle(&engine, as_of, json).await
        }
        Commands::Patterns {
            pattern_type,
            status,
            device,
            limit,
        } => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::status::list_patterns(
                &engine,
                pattern_type.as_deref(),
                status.as_deref(),
                device.as_deref(),
                limit,
                json,
            )
            .await
        }
        Commands::Synergies {
            relationship,
            status,
            entity,
            limit,
        } => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::status::list_synergies(
                &engine,
                relationship.as_deref(),
                status.as_deref(),
                entity.as_deref(),
                limit,
                json,
            )
            .await
        }
        Commands::Runs { limit } => {
            let engine = cli::open_engine(config, &db, None, None).await?;
            cli::status::list_runs(&engine, limit, json).await
        }
        Commands::Serve {
            events,
            every,
            port,
        } => {
            let engine = cli::open_engine(config, &db, events.as_deref(), None).await?;
            let every = every.map(|mins| Duration::from_secs(mins.max(1) * 60));
            cli::serve::run_serve(engine, port, every).await
        }
        Commands::Status { .. } | Commands::Migrate { .. } => Ok(()),
    }
}
