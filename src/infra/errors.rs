// src/infra/errors.rs — Error types for homeminer

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    // Input errors (reject the run)
    #[error("Invalid event window: {0}")]
    Input(String),

    // Isolated: logged, never aborts a run
    #[error("Detector '{detector}' failed: {message}")]
    DetectorFailure { detector: String, message: String },

    // Storage errors (retriable with backoff, run fails on exhaustion)
    #[error("Persistence error: {message}")]
    Persistence { message: String, retriable: bool },

    // Non-fatal degrade
    #[error("Enrichment source '{source_name}' unavailable: {message}")]
    EnrichmentUnavailable {
        source_name: String,
        message: String,
    },

    // No-op, not a failure
    #[error("Calibration needs {required} feedback samples, have {samples}")]
    CalibrationDataInsufficient { samples: usize, required: usize },

    #[error("An analysis run is already in progress")]
    RunInProgress,

    #[error("Run cancelled before commit")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Persistence { retriable, .. } => *retriable,
            EngineError::Database(e) => is_busy(e),
            _ => false,
        }
    }

    /// Whether this error must abort the surrounding run.
    pub fn aborts_run(&self) -> bool {
        !matches!(
            self,
            EngineError::DetectorFailure { .. }
                | EngineError::EnrichmentUnavailable { .. }
                | EngineError::CalibrationDataInsufficient { .. }
        )
    }

    /// Map a store-level error into a persistence failure, keeping SQLite
    /// busy/locked conditions retriable.
    pub fn persistence(err: anyhow::Error) -> Self {
        let retriable = err
            .downcast_ref::<rusqlite::Error>()
            .map(is_busy)
            .unwrap_or(false);
        EngineError::Persistence {
            message: format!("{err:#}"),
            retriable,
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// A failure that escaped an analysis run, tagged with the run's correlation id.
#[derive(Error, Debug)]
#[error("run {run_id} failed: {error}")]
pub struct RunError {
    pub run_id: Uuid,
    #[source]
    pub error: EngineError,
}

impl RunError {
    pub fn new(run_id: Uuid, error: EngineError) -> Self {
        Self { run_id, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_retriable_flag() {
        let err = EngineError::Persistence {
            message: "disk busy".into(),
            retriable: true,
        };
        assert!(err.is_retriable());
        let err = EngineError::Persistence {
            message: "constraint".into(),
            retriable: false,
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_isolated_errors_do_not_abort() {
        let detector = EngineError::DetectorFailure {
            detector: "anomaly".into(),
            message: "boom".into(),
        };
        assert!(!detector.aborts_run());
        let enrichment = EngineError::EnrichmentUnavailable {
            source_name: "weather".into(),
            message: "timeout".into(),
        };
        assert!(!enrichment.aborts_run());
        assert!(EngineError::Input("unsorted".into()).aborts_run());
    }

    #[test]
    fn test_anyhow_persistence_mapping_not_retriable() {
        let err = EngineError::persistence(anyhow::anyhow!("no such table"));
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn test_run_error_carries_run_id() {
        let id = Uuid::new_v4();
        let err = RunError::new(id, EngineError::RunInProgress);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
