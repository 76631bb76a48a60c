//! Transaction boundary over an [`ItemStore`].
//!
//! A [`UnitOfWork`] buffers entity writes and the domain events they produce,
//! then sends both as one atomic batch: every event becomes a pending outbox
//! record in the same `transact_write` call as the state change it describes.
//! Nothing is ever sent to a message transport from here.

use chrono::{DateTime, Utc};
use common::{Context, OperationId};
use futures_util::future::BoxFuture;
use store::{EventEnvelope, EventId, Item, ItemStore, OutboxRecord, WriteItem};

use crate::entity::DomainEvent;
use crate::error::UnitOfWorkError;

/// Error type returned by rollback callbacks.
pub type RollbackError = Box<dyn std::error::Error + Send + Sync>;

type RollbackFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RollbackError>> + Send>;

/// Lifecycle of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Active,
    Committed,
    RolledBack,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    /// Number of items written, outbox records included.
    pub items_written: usize,
    /// Events recorded as pending in the outbox, in registration order.
    pub event_ids: Vec<EventId>,
    pub committed_at: DateTime<Utc>,
}

/// Buffers writes, events and rollback callbacks for one atomic commit.
///
/// A unit of work is owned by a single saga run. It can be reused for a new
/// transaction once the previous one has committed or rolled back.
pub struct UnitOfWork<S: ItemStore> {
    store: S,
    state: TransactionState,
    writes: Vec<WriteItem>,
    events: Vec<EventEnvelope>,
    rollbacks: Vec<(String, RollbackFn)>,
    operation_id: Option<OperationId>,
}

impl<S: ItemStore> std::fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .field("events", &self.events.len())
            .field("rollbacks", &self.rollbacks.len())
            .finish()
    }
}

impl<S: ItemStore> UnitOfWork<S> {
    /// Creates an idle unit of work over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: TransactionState::Idle,
            writes: Vec::new(),
            events: Vec::new(),
            rollbacks: Vec::new(),
            operation_id: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Buffered entity writes.
    pub fn pending_writes(&self) -> &[WriteItem] {
        &self.writes
    }

    /// Buffered events.
    pub fn pending_events(&self) -> &[EventEnvelope] {
        &self.events
    }

    /// Number of items the commit would send: writes plus one outbox record
    /// per event.
    pub fn batch_len(&self) -> usize {
        self.writes.len() + self.events.len()
    }

    /// Opens a transaction.
    ///
    /// The context's operation ID, if any, is attached to every event
    /// registered in this transaction.
    #[tracing::instrument(skip(self, ctx))]
    pub fn begin(&mut self, ctx: &Context) -> Result<(), UnitOfWorkError> {
        if self.is_active() {
            return Err(UnitOfWorkError::AlreadyActive);
        }
        self.clear();
        self.operation_id = ctx.operation_id();
        self.state = TransactionState::Active;
        tracing::debug!("transaction started");
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), UnitOfWorkError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(UnitOfWorkError::NotActive)
        }
    }

    /// Buffers an unconditional put.
    pub fn register_save(&mut self, item: Item) -> Result<(), UnitOfWorkError> {
        self.register_write(WriteItem::put(item))
    }

    /// Buffers an unconditional delete.
    pub fn register_delete(&mut self, key: impl Into<String>) -> Result<(), UnitOfWorkError> {
        self.register_write(WriteItem::delete(key))
    }

    /// Buffers a write with its precondition.
    ///
    /// The batch cap is not checked here; an oversized transaction fails at
    /// commit.
    pub fn register_write(&mut self, write: WriteItem) -> Result<(), UnitOfWorkError> {
        self.ensure_active()?;
        self.writes.push(write);
        Ok(())
    }

    /// Buffers a domain event for the outbox and returns its ID.
    pub fn register_event<E: DomainEvent>(&mut self, event: &E) -> Result<EventId, UnitOfWorkError> {
        self.ensure_active()?;
        let envelope = event.to_envelope()?;
        self.register_envelope(envelope)
    }

    /// Buffers an already wrapped event.
    pub fn register_envelope(
        &mut self,
        mut envelope: EventEnvelope,
    ) -> Result<EventId, UnitOfWorkError> {
        self.ensure_active()?;
        if let Some(operation_id) = self.operation_id {
            envelope.default_metadata("operation_id", || {
                serde_json::Value::String(operation_id.to_string())
            });
        }
        let event_id = envelope.event_id;
        self.events.push(envelope);
        Ok(event_id)
    }

    /// Registers a side effect to undo if the transaction does not commit,
    /// such as releasing a lock taken while it was open.
    ///
    /// Callbacks run in reverse registration order; a failing callback is
    /// logged and the rest still run.
    pub fn register_rollback<F, Fut>(
        &mut self,
        name: impl Into<String>,
        callback: F,
    ) -> Result<(), UnitOfWorkError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), RollbackError>> + Send + 'static,
    {
        self.ensure_active()?;
        let boxed: RollbackFn = Box::new(move || Box::pin(callback()));
        self.rollbacks.push((name.into(), boxed));
        Ok(())
    }

    /// Sends every buffered write and outbox record as one atomic batch.
    ///
    /// On any failure (batch over the store's cap, failed condition, store
    /// error, cancelled context) nothing is written, every rollback callback
    /// runs and the transaction ends rolled back.
    #[tracing::instrument(skip(self, ctx), fields(writes = self.writes.len(), events = self.events.len()))]
    pub async fn commit(&mut self, ctx: &Context) -> Result<CommitReceipt, UnitOfWorkError> {
        self.ensure_active()?;

        match self.try_commit(ctx).await {
            Ok(receipt) => {
                self.clear();
                self.state = TransactionState::Committed;
                metrics::counter!("uow_commits_total").increment(1);
                metrics::histogram!("uow_batch_size").record(receipt.items_written as f64);
                tracing::debug!(items = receipt.items_written, "transaction committed");
                Ok(receipt)
            }
            Err(e) => {
                metrics::counter!("uow_commit_failures_total").increment(1);
                tracing::warn!(error = %e, "commit failed, rolling back");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn try_commit(&mut self, ctx: &Context) -> Result<CommitReceipt, UnitOfWorkError> {
        if ctx.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let items = self.batch_len();
        let max = self.store.max_batch_size();
        if items > max {
            return Err(UnitOfWorkError::BatchTooLarge { items, max });
        }

        let event_ids: Vec<EventId> = self.events.iter().map(|e| e.event_id).collect();
        let mut batch = Vec::with_capacity(items);
        batch.extend(self.writes.iter().cloned());
        for envelope in &self.events {
            batch.push(OutboxRecord::pending(envelope.clone()).into_create()?);
        }

        if !batch.is_empty() {
            self.store.transact_write(batch).await?;
        }

        Ok(CommitReceipt {
            items_written: items,
            event_ids,
            committed_at: Utc::now(),
        })
    }

    /// Aborts the open transaction and runs its rollback callbacks.
    ///
    /// A no-op once the transaction has committed or already rolled back.
    #[tracing::instrument(skip(self))]
    pub async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        match self.state {
            TransactionState::Committed | TransactionState::RolledBack => Ok(()),
            TransactionState::Idle => Err(UnitOfWorkError::NotActive),
            TransactionState::Active => {
                self.abort().await;
                Ok(())
            }
        }
    }

    async fn abort(&mut self) {
        let callbacks = std::mem::take(&mut self.rollbacks);
        self.clear();
        self.state = TransactionState::RolledBack;

        for (name, callback) in callbacks.into_iter().rev() {
            if let Err(e) = callback().await {
                metrics::counter!("uow_rollback_callback_failures_total").increment(1);
                tracing::warn!(callback = %name, error = %e, "rollback callback failed");
            }
        }
        tracing::debug!("transaction rolled back");
    }

    fn clear(&mut self) {
        self.writes.clear();
        self.events.clear();
        self.rollbacks.clear();
    }
}
