// src/cli/serve.rs — HTTP API server with an optional analysis timer

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::core::engine::Engine;
use crate::core::scheduler::RunRequest;
use crate::infra::errors::EngineError;

/// Serve until Ctrl-C. With `every`, an incremental analysis runs on each tick.
pub async fn run_serve(
    engine: Engine,
    port: Option<u16>,
    every: Option<Duration>,
) -> anyhow::Result<()> {
    let mut api_config = engine.config().api.clone().unwrap_or_default();
    if let Some(port) = port {
        api_config.port = port;
    }
    if !api_config.enabled && port.is_none() {
        anyhow::bail!("API disabled in config; pass --port to serve anyway");
    }

    let engine = Arc::new(engine);
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let ticker = every.map(|period| {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        tokio::spawn(analysis_loop(engine, period, shutdown))
    });

    let state = ApiState {
        engine,
        token: api_config.token.clone(),
    };
    println!("Serving on http://127.0.0.1:{} (Ctrl-C to stop)", api_config.port);
    let result = api::start_server(&api_config, state, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(handle) = ticker {
        let _ = handle.await;
    }
    result
}

async fn analysis_loop(engine: Arc<Engine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let request = RunRequest::incremental(Utc::now());
        match engine.analyze(request, shutdown.child_token()).await {
            Ok(report) => tracing::info!(
                run_id = %report.record.run_id,
                status = report.record.status.as_str(),
                patterns = report.patterns.len(),
                synergies = report.synergies.len(),
                "Scheduled analysis finished"
            ),
            Err(e) if matches!(e.error, EngineError::RunInProgress) => {
                tracing::debug!("Previous analysis still running, tick skipped");
            }
            Err(e) => tracing::warn!("Scheduled analysis failed: {e}"),
        }
    }
}
