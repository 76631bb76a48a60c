//! Status of long-running operations, persisted so that any worker can
//! answer a poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OperationId;
use serde::{Deserialize, Serialize};
use store::{Item, ItemStore, ItemStoreExt, StoreError, WriteItem};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Key prefix of operation records.
pub const OPERATION_PREFIX: &str = "operation#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

/// Where an asynchronous operation stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: OperationId,
    /// What kind of operation this is, such as `"node_creation"`.
    pub kind: String,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the operation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Set if the operation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn pending(operation_id: OperationId, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            kind: kind.into(),
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn key_for(operation_id: OperationId) -> String {
        format!("{OPERATION_PREFIX}{operation_id}")
    }

    pub fn key(&self) -> String {
        Self::key_for(self.operation_id)
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = OperationStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Returns true if the record was last touched more than `retention`
    /// before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.updated_at + retention <= now
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("operation not found: {0}")]
    NotFound(OperationId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stores and serves [`OperationRecord`]s.
#[async_trait]
pub trait OperationStatusTracker: Send + Sync {
    /// Stores a new record, replacing any record with the same ID.
    async fn store(&self, record: OperationRecord) -> Result<(), TrackerError>;

    async fn get(&self, operation_id: OperationId) -> Result<Option<OperationRecord>, TrackerError>;

    /// Replaces an existing record.
    async fn update(&self, record: OperationRecord) -> Result<(), TrackerError>;

    async fn delete(&self, operation_id: OperationId) -> Result<(), TrackerError>;

    /// Deletes records older than the tracker's retention, returning how
    /// many were removed.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, TrackerError>;
}

/// Tracker that keeps records as items under `operation#<id>`.
#[derive(Debug, Clone)]
pub struct StoreOperationTracker<S: ItemStore> {
    store: S,
    retention: chrono::Duration,
}

impl<S: ItemStore> StoreOperationTracker<S> {
    pub fn new(store: S, retention: Duration) -> Self {
        Self {
            store,
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }
}

#[async_trait]
impl<S: ItemStore> OperationStatusTracker for StoreOperationTracker<S> {
    async fn store(&self, record: OperationRecord) -> Result<(), TrackerError> {
        let item = Item::from_serializable(record.key(), &record)?;
        self.store.put_item(item).await?;
        Ok(())
    }

    async fn get(&self, operation_id: OperationId) -> Result<Option<OperationRecord>, TrackerError> {
        match self.store.get(&OperationRecord::key_for(operation_id)).await? {
            Some(item) => Ok(Some(item.decode()?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, record), fields(operation_id = %record.operation_id, status = ?record.status))]
    async fn update(&self, record: OperationRecord) -> Result<(), TrackerError> {
        let key = record.key();
        let current = self
            .store
            .get(&key)
            .await?
            .ok_or(TrackerError::NotFound(record.operation_id))?;
        let item = Item::from_serializable(key, &record)?.with_version(current.version.next());
        self.store
            .transact_write(vec![WriteItem::put_if_version(item, current.version)])
            .await?;
        Ok(())
    }

    async fn delete(&self, operation_id: OperationId) -> Result<(), TrackerError> {
        self.store
            .delete_item(&OperationRecord::key_for(operation_id))
            .await?;
        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let mut removed = 0;
        for item in self.store.query_prefix(OPERATION_PREFIX).await? {
            let record: OperationRecord = item.decode()?;
            if record.is_expired_at(now, self.retention) {
                self.store.delete_item(&item.key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            metrics::counter!("operations_expired_total").increment(removed as u64);
            tracing::debug!(removed, "expired operation records removed");
        }
        Ok(removed)
    }
}

/// A running cleanup loop. Stop it with [`CleanupTask::stop`].
#[derive(Debug)]
pub struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Signals the loop to stop and waits for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "operation cleanup task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Runs `cleanup_expired` every `interval` until `token` is cancelled or
/// the returned task is stopped.
pub fn spawn_cleanup<T>(tracker: Arc<T>, interval: Duration, token: CancellationToken) -> CleanupTask
where
    T: OperationStatusTracker + ?Sized + 'static,
{
    let loop_token = token.clone();
    let handle = tokio::spawn(async move {
        tracing::info!(interval_ms = interval.as_millis() as u64, "operation cleanup started");
        loop {
            tokio::select! {
                () = loop_token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = tracker.cleanup_expired(Utc::now()).await {
                tracing::warn!(error = %e, "operation cleanup failed");
            }
        }
        tracing::info!("operation cleanup stopped");
    });
    CleanupTask { token, handle }
}
