// src/provider/jsonl.rs — JSON-lines event files and JSON context files

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

use super::{ContextProvider, EventWindowProvider, StaticEventSource};
use crate::core::types::Event;
use crate::infra::errors::EngineError;
use crate::synergy::context::ContextSnapshot;

/// One JSON `Event` per line. Blank lines and `#` comments are skipped.
pub fn parse_events(text: &str) -> Result<Vec<Event>, EngineError> {
    let mut events = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: Event = serde_json::from_str(line)
            .map_err(|e| EngineError::Input(format!("line {}: {e}", i + 1)))?;
        events.push(event);
    }
    Ok(events)
}

/// Event file loaded lazily on first use and cached.
pub struct JsonlEventSource {
    path: PathBuf,
    loaded: OnceCell<StaticEventSource>,
}

impl JsonlEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn source(&self) -> Result<&StaticEventSource, EngineError> {
        self.loaded
            .get_or_try_init(|| async {
                let text = tokio::fs::read_to_string(&self.path).await?;
                let events = parse_events(&text)?;
                tracing::debug!(path = %self.path.display(), events = events.len(), "Loaded event file");
                Ok::<_, EngineError>(StaticEventSource::new(events))
            })
            .await
    }
}

#[async_trait]
impl EventWindowProvider for JsonlEventSource {
    fn id(&self) -> &str {
        "jsonl"
    }

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.source().await?.slice(start, end))
    }
}

/// Context snapshot read from a JSON file on every request.
pub struct JsonContextFile {
    path: PathBuf,
}

impl JsonContextFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContextProvider for JsonContextFile {
    fn id(&self) -> &str {
        "json_file"
    }

    async fn snapshot(&self, _at: DateTime<Utc>) -> Result<ContextSnapshot, EngineError> {
        let unavailable = |message: String| EngineError::EnrichmentUnavailable {
            source_name: self.path.display().to_string(),
            message,
        };
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| unavailable(e.to_string()))
    }
}
