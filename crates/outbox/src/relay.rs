//! Out-of-band delivery of pending outbox records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use store::{Item, ItemStore, OUTBOX_PREFIX, OutboxRecord, StoreError, WriteItem};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::publisher::EventPublisher;

/// Wakes a running relay before its next poll.
///
/// Cheap to clone. A wake sent while the relay is busy is remembered, so
/// the relay drains again as soon as it is idle.
#[derive(Clone, Default)]
pub struct RelayHandle {
    notify: Arc<Notify>,
}

impl RelayHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    async fn woken(&self) {
        self.notify.notified().await;
    }
}

/// Counts from one pass over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records delivered and marked published.
    pub published: usize,
    /// Records whose delivery failed; they stay pending.
    pub failed: usize,
    /// Records updated by another relay in the meantime.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Published,
    Failed,
    Skipped,
}

/// Drains pending outbox records into an [`EventPublisher`].
///
/// Each record is published and then moved from [`OUTBOX_PREFIX`] to
/// [`PUBLISHED_PREFIX`](store::PUBLISHED_PREFIX) in one batch checked
/// against the version that was read, so a pass only ever reads records that
/// still need delivery. If another relay got there first the record is
/// skipped. A failed delivery increments the record's attempt count and
/// leaves it pending for the next pass.
pub struct OutboxRelay<S: ItemStore, P: EventPublisher> {
    store: S,
    publisher: P,
    handle: RelayHandle,
}

impl<S: ItemStore, P: EventPublisher> OutboxRelay<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            handle: RelayHandle::new(),
        }
    }

    /// Returns a handle that wakes this relay.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Returns every pending record with the item it was read from.
    pub async fn pending(&self) -> Result<Vec<(Item, OutboxRecord)>> {
        let mut pending = Vec::new();
        for item in self.store.query_prefix(OUTBOX_PREFIX).await? {
            let record = OutboxRecord::from_item(&item)?;
            if record.is_pending() {
                pending.push((item, record));
            }
        }
        Ok(pending)
    }

    /// Makes one pass over the outbox, oldest event first.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let mut pending = self.pending().await?;
        pending.sort_by_key(|(_, record)| record.event.recorded_at);

        let mut report = DrainReport::default();
        for (item, record) in pending {
            match self.deliver(&item, record).await? {
                Delivery::Published => report.published += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Skipped => report.skipped += 1,
            }
        }

        if report != DrainReport::default() {
            tracing::debug!(
                published = report.published,
                failed = report.failed,
                skipped = report.skipped,
                "outbox drained"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, item: &Item, mut record: OutboxRecord) -> Result<Delivery> {
        let outcome = match self.publisher.publish(&record.event).await {
            Ok(()) => {
                record.mark_published(Utc::now());
                Delivery::Published
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %record.event.event_id,
                    event_type = %record.event.event_type,
                    attempts = record.attempts + 1,
                    error = %e,
                    "event delivery failed"
                );
                record.record_failure(e.to_string());
                Delivery::Failed
            }
        };

        let writes = match outcome {
            Delivery::Published => record.archive_writes(item.version)?,
            _ => vec![WriteItem::put_if_version(
                record.to_item(item.version.next())?,
                item.version,
            )],
        };
        match self.store.transact_write(writes).await {
            Ok(()) => {
                match outcome {
                    Delivery::Published => {
                        metrics::counter!("outbox_events_published_total").increment(1)
                    }
                    _ => metrics::counter!("outbox_publish_failures_total").increment(1),
                }
                Ok(outcome)
            }
            Err(StoreError::ConditionFailed { .. }) => {
                metrics::counter!("outbox_events_skipped_total").increment(1);
                tracing::debug!(event_id = %record.event.event_id, "record changed concurrently, skipping");
                Ok(Delivery::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drains the outbox every `interval`, or sooner when woken, until
    /// `token` is cancelled. A failed pass is logged and retried on the next
    /// tick.
    pub async fn run(&self, token: CancellationToken, interval: Duration) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "outbox relay started");
        loop {
            if let Err(e) = self.drain_once().await {
                metrics::counter!("outbox_drain_errors_total").increment(1);
                tracing::error!(error = %e, "outbox drain failed");
            }

            tokio::select! {
                () = token.cancelled() => break,
                () = self.handle.woken() => {}
                () = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("outbox relay stopped");
    }
}

impl<S, P> OutboxRelay<S, P>
where
    S: ItemStore + 'static,
    P: EventPublisher + 'static,
{
    /// Runs the relay on its own task.
    pub fn spawn(self: Arc<Self>, token: CancellationToken, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token, interval).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::InMemoryEventPublisher;
    use store::{
        EntityId, EventEnvelope, EventId, EventStatus, InMemoryStore, ItemStoreExt, PUBLISHED_PREFIX,
    };

    fn event(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            event_type,
            "Node",
            EntityId::new(),
            serde_json::json!({"content": "traits"}),
        )
    }

    async fn record_pending(store: &InMemoryStore, event: EventEnvelope) -> EventId {
        let record = OutboxRecord::pending(event);
        let event_id = record.event.event_id;
        store
            .transact_write(vec![record.into_create().unwrap()])
            .await
            .unwrap();
        event_id
    }

    async fn load(store: &InMemoryStore, key: &str) -> OutboxRecord {
        OutboxRecord::from_item(&store.get(key).await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn drain_publishes_and_archives_records() {
        let store = InMemoryStore::new();
        let publisher = InMemoryEventPublisher::new();
        let relay = OutboxRelay::new(store.clone(), publisher.clone());
        let event_id = record_pending(&store, event("NodeCreated")).await;

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(publisher.published_count().await, 1);

        assert!(!store.exists(&OutboxRecord::key_for(event_id)).await.unwrap());
        let record = load(&store, &OutboxRecord::published_key_for(event_id)).await;
        assert_eq!(record.status, EventStatus::Published);
        assert!(record.published_at.is_some());

        // Published records are not delivered again
        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(publisher.published_count().await, 1);
    }

    #[tokio::test]
    async fn published_records_leave_the_pending_scan() {
        let store = InMemoryStore::new();
        let relay = OutboxRelay::new(store.clone(), InMemoryEventPublisher::new());
        for _ in 0..3 {
            record_pending(&store, event("NodeCreated")).await;
        }
        relay.drain_once().await.unwrap();
        let fresh = record_pending(&store, event("EdgeCreated")).await;

        let pending = relay.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.event.event_id, fresh);
        assert_eq!(store.query_prefix(OUTBOX_PREFIX).await.unwrap().len(), 1);
        assert_eq!(store.query_prefix(PUBLISHED_PREFIX).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending_with_attempts() {
        let store = InMemoryStore::new();
        let publisher = InMemoryEventPublisher::new();
        publisher.fail_next(1);
        let relay = OutboxRelay::new(store.clone(), publisher.clone());
        let event_id = record_pending(&store, event("EdgeCreated")).await;
        let key = OutboxRecord::key_for(event_id);

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report.failed, 1);
        let record = load(&store, &key).await;
        assert!(record.is_pending());
        assert_eq!(record.attempts, 1);
        assert!(record.last_error.is_some());

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report.published, 1);
        let record = load(&store, &OutboxRecord::published_key_for(event_id)).await;
        assert_eq!(record.status, EventStatus::Published);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn concurrent_update_is_skipped() {
        let store = InMemoryStore::new();
        let relay = OutboxRelay::new(store.clone(), InMemoryEventPublisher::new());
        let event_id = record_pending(&store, event("NodeCreated")).await;

        let (stale_item, record) = relay.pending().await.unwrap().remove(0);
        // Another relay publishes first
        relay.drain_once().await.unwrap();

        let outcome = relay.deliver(&stale_item, record).await.unwrap();
        assert_eq!(outcome, Delivery::Skipped);
        let archived = load(&store, &OutboxRecord::published_key_for(event_id)).await;
        assert_eq!(archived.status, EventStatus::Published);
    }

    #[tokio::test]
    async fn non_outbox_items_are_ignored() {
        let store = InMemoryStore::new();
        store
            .put_item(Item::new("node#1", serde_json::json!({"content": "x"})))
            .await
            .unwrap();
        let relay = OutboxRelay::new(store, InMemoryEventPublisher::new());
        assert!(relay.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_drains_on_wake_and_stops_on_cancel() {
        let store = InMemoryStore::new();
        let publisher = InMemoryEventPublisher::new();
        let relay = Arc::new(OutboxRelay::new(store.clone(), publisher.clone()));
        let handle = relay.handle();
        let token = CancellationToken::new();

        let task = relay.clone().spawn(token.clone(), Duration::from_secs(3600));
        record_pending(&store, event("NodeCreated")).await;
        handle.wake();

        for _ in 0..100 {
            if publisher.published_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(publisher.published_count().await, 1);

        token.cancel();
        task.await.unwrap();
    }
}
