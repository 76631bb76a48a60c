use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use common::EventId;

use crate::EntityId;

/// Optimistic-concurrency version of a stored item.
///
/// Absent items are at 0, the first write stores 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn initial() -> Self {
        Self(0)
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A serialized domain event on its way through the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    /// Such as `"NodeCreated"`.
    pub event_type: String,
    /// The entity the event is about.
    pub aggregate_id: EntityId,
    /// Such as `"Node"`.
    pub aggregate_type: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    /// Context such as the operation that produced the event.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Wraps `payload` under a fresh event ID, recorded now.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: EntityId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            recorded_at: Utc::now(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Serializes `payload` into a new envelope.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: EntityId,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event_type,
            aggregate_type,
            aggregate_id,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets metadata only if `key` is not present yet.
    pub fn default_metadata(&mut self, key: &str, value: impl FnOnce() -> serde_json::Value) {
        self.metadata.entry(key.to_string()).or_insert_with(value);
    }
}
