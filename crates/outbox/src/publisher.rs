//! Event transport port.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use store::EventEnvelope;
use tokio::sync::RwLock;

use crate::{OutboxError, Result};

/// Delivers events to downstream consumers.
///
/// Delivery is at-least-once: a relay may hand the same event to the
/// publisher more than once, so consumers must deduplicate by event ID.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &EventEnvelope) -> Result<()>;
}

/// In-memory publisher for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<EventEnvelope>>>,
    failing: Arc<AtomicUsize>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }

    /// Returns every event delivered so far, in delivery order.
    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<()> {
        let should_fail = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(OutboxError::Publish("transport unavailable".to_string()));
        }

        self.published.write().await.push(event.clone());
        Ok(())
    }
}

/// Publisher that writes each event to the log. Used by the server when no
/// message transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "event published"
        );
        Ok(())
    }
}
