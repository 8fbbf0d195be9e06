// src/provider/mod.rs — Event and context collaborators

pub mod jsonl;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::Event;
use crate::infra::errors::EngineError;
use crate::synergy::context::ContextSnapshot;

/// Read-only source of device state changes.
#[async_trait]
pub trait EventWindowProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Events with `start <= timestamp < end`, sorted by timestamp.
    async fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError>;
}

/// Optional weather/energy/calendar enrichment. Callers treat any error
/// as "no context".
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn id(&self) -> &str;
    async fn snapshot(&self, at: DateTime<Utc>) -> Result<ContextSnapshot, EngineError>;
}

/// Events held in memory, for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct StaticEventSource {
    events: Vec<Event>,
}

impl StaticEventSource {
    pub fn new(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Event> {
        let lo = self.events.partition_point(|e| e.timestamp < start);
        let hi = self.events.partition_point(|e| e.timestamp < end);
        self.events[lo..hi.max(lo)].to_vec()
    }
}

#[async_trait]
impl EventWindowProvider for StaticEventSource {
    fn id(&self) -> &str {
        "static"
    }

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.slice(start, end))
    }
}

/// A fixed context snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    snapshot: ContextSnapshot,
}

impl StaticContext {
    pub fn new(snapshot: ContextSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    fn id(&self) -> &str {
        "static"
    }

    async fn snapshot(&self, _at: DateTime<Utc>) -> Result<ContextSnapshot, EngineError> {
        Ok(self.snapshot.clone())
    }
}
