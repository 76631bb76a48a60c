//! Store-backed mutual exclusion for "create X if absent" races between
//! independent workers.
//!
//! Ownership is a conditional create of `lock#<resource>` in the shared store,
//! so the worker that releases a lock does not need to share memory with the
//! one that acquired it. Every record carries a TTL: a crashed holder's lock
//! expires and becomes acquirable again, which means callers must re-check the
//! precondition they are protecting after acquiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::{Condition, Item, ItemStore, StoreError, WriteItem};

/// Key prefix shared by all lock records.
pub const LOCK_PREFIX: &str = "lock#";

/// Errors raised while acquiring or releasing a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock for longer than the acquire timeout.
    #[error("Timed out after {waited_ms}ms waiting for lock on '{resource}'")]
    Timeout { resource: String, waited_ms: u64 },

    /// The context was cancelled while waiting.
    #[error("Lock acquisition for '{resource}' was cancelled")]
    Cancelled { resource: String },

    /// The record was gone or owned by someone else at release time.
    #[error("Lock on '{resource}' is no longer held by '{owner}'")]
    NotOwner { resource: String, owner: String },

    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}

/// Timing parameters for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// How long the record stays valid if never released.
    pub ttl: Duration,
    /// How long to keep retrying under contention.
    pub acquire_timeout: Duration,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    resource: String,
    owner: String,
    acquired_at: DateTime<Utc>,
    ttl_ms: u64,
}

struct LockInner<S: ItemStore + Clone + 'static> {
    store: S,
    resource: String,
    owner: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
    released: AtomicBool,
}

/// A held lock.
///
/// Clones share one released flag: whichever clone calls
/// [`DistributedLock::release`] first deletes the record and every later call
/// is a no-op. If the last clone is dropped while still held, a best-effort
/// release is spawned on the current runtime.
pub struct DistributedLock<S: ItemStore + Clone + 'static> {
    inner: Arc<LockInner<S>>,
}

impl<S: ItemStore + Clone + 'static> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ItemStore + Clone + 'static> std::fmt::Debug for DistributedLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("resource", &self.inner.resource)
            .field("owner", &self.inner.owner)
            .field("acquired_at", &self.inner.acquired_at)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Returns the store key guarding `resource`.
pub fn lock_key(resource: &str) -> String {
    format!("{LOCK_PREFIX}{resource}")
}

fn owned_by(owner: &str) -> Condition {
    Condition::AttributeEquals {
        attribute: "owner".to_string(),
        value: serde_json::Value::String(owner.to_string()),
    }
}

async fn delete_owned<S: ItemStore>(
    store: &S,
    resource: &str,
    owner: &str,
) -> Result<(), LockError> {
    let write = WriteItem::delete_if(lock_key(resource), owned_by(owner));
    match store.transact_write(vec![write]).await {
        Ok(()) => Ok(()),
        Err(StoreError::ConditionFailed { .. }) => Err(LockError::NotOwner {
            resource: resource.to_string(),
            owner: owner.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

impl<S: ItemStore + Clone + 'static> DistributedLock<S> {
    /// Attempts to take the lock on `resource`, retrying under contention
    /// until `options.acquire_timeout` elapses.
    ///
    /// Acquisition order among contenders is unspecified.
    #[tracing::instrument(skip(store, ctx, options), fields(resource = %resource, owner = %owner))]
    pub async fn try_acquire(
        store: S,
        ctx: &Context,
        resource: &str,
        owner: &str,
        options: &LockOptions,
    ) -> Result<Self, LockError> {
        let started = Instant::now();
        let deadline = started + options.acquire_timeout;
        let ttl = chrono::Duration::from_std(options.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let mut attempts: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(LockError::Cancelled {
                    resource: resource.to_string(),
                });
            }
            attempts += 1;

            let acquired_at = Utc::now();
            let record = LockRecord {
                resource: resource.to_string(),
                owner: owner.to_string(),
                acquired_at,
                ttl_ms: options.ttl.as_millis() as u64,
            };
            let item = Item::from_serializable(lock_key(resource), &record)
                .map_err(StoreError::from)?
                .with_expiry(acquired_at + ttl);

            match store.transact_write(vec![WriteItem::put_if_absent(item)]).await {
                Ok(()) => {
                    metrics::counter!("lock_acquired_total").increment(1);
                    metrics::histogram!("lock_wait_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::debug!(attempts, "lock acquired");
                    return Ok(Self {
                        inner: Arc::new(LockInner {
                            store,
                            resource: resource.to_string(),
                            owner: owner.to_string(),
                            acquired_at,
                            ttl: options.ttl,
                            released: AtomicBool::new(false),
                        }),
                    });
                }
                Err(StoreError::ConditionFailed { .. }) => {
                    metrics::counter!("lock_contention_total").increment(1);
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("lock_timeout_total").increment(1);
                tracing::warn!(attempts, "timed out waiting for lock");
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }

            let pause = options.retry_interval.min(deadline - now);
            tokio::select! {
                () = ctx.cancelled() => {
                    return Err(LockError::Cancelled { resource: resource.to_string() });
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Acquires the lock, runs `f`, and releases the lock whatever `f`
    /// returns. A failed release is logged; the lock then expires by TTL.
    pub async fn with_lock<F, Fut, T>(
        store: S,
        ctx: &Context,
        resource: &str,
        owner: &str,
        options: &LockOptions,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = Self::try_acquire(store, ctx, resource, owner, options).await?;
        let output = f().await;
        if let Err(e) = lock.release().await {
            tracing::warn!(resource, error = %e, "failed to release lock");
        }
        Ok(output)
    }

    /// Deletes the lock record if this owner still holds it.
    ///
    /// Only the first call across all clones touches the store; later calls
    /// return `Ok(())`.
    #[tracing::instrument(skip(self), fields(resource = %self.inner.resource, owner = %self.inner.owner))]
    pub async fn release(&self) -> Result<(), LockError> {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            tracing::trace!("lock already released");
            return Ok(());
        }

        metrics::counter!("lock_released_total").increment(1);
        delete_owned(&self.inner.store, &self.inner.resource, &self.inner.owner).await
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.inner.acquired_at
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl<S: ItemStore + Clone + 'static> Drop for LockInner<S> {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                resource = %self.resource,
                "lock dropped outside a runtime; it will expire after its ttl"
            );
            return;
        };

        tracing::warn!(
            resource = %self.resource,
            owner = %self.owner,
            "lock dropped without release; releasing in background"
        );
        let store = self.store.clone();
        let resource = self.resource.clone();
        let owner = self.owner.clone();
        runtime.spawn(async move {
            if let Err(e) = delete_owned(&store, &resource, &owner).await {
                tracing::warn!(%resource, error = %e, "background lock release failed");
            }
        });
    }
}
