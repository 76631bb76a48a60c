use std::collections::HashSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{Item, Result, StoreError, Version, WriteItem};

/// Default cap on the number of writes in one atomic batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

/// Core trait for item store implementations.
///
/// An item store persists keyed JSON items and offers one primitive for
/// mutation: a small, bounded, all-or-nothing batch of conditional writes.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Maximum number of writes accepted by [`ItemStore::transact_write`].
    fn max_batch_size(&self) -> usize;

    /// Applies a batch of writes atomically.
    ///
    /// Either every write is applied or none is. Fails with
    /// `BatchTooLarge` when the batch exceeds [`ItemStore::max_batch_size`]
    /// and with `ConditionFailed` when any precondition does not hold.
    async fn transact_write(&self, writes: Vec<WriteItem>) -> Result<()>;

    /// Reads a live (unexpired) item.
    async fn get(&self, key: &str) -> Result<Option<Item>>;

    /// Returns all live items whose key starts with `prefix`, ordered by key.
    async fn query_prefix(&self, prefix: &str) -> Result<Vec<Item>>;
}

/// Extension trait providing convenience methods for item stores.
#[async_trait]
pub trait ItemStoreExt: ItemStore {
    /// Writes a single item unconditionally.
    async fn put_item(&self, item: Item) -> Result<()> {
        self.transact_write(vec![WriteItem::put(item)]).await
    }

    /// Writes a single item only if its key is free.
    async fn put_if_absent(&self, item: Item) -> Result<()> {
        self.transact_write(vec![WriteItem::put_if_absent(item)])
            .await
    }

    /// Deletes a single item unconditionally.
    async fn delete_item(&self, key: &str) -> Result<()> {
        self.transact_write(vec![WriteItem::delete(key)]).await
    }

    /// Checks if a live item exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Reads and decodes an item, returning its stored version alongside.
    async fn get_decoded<T>(&self, key: &str) -> Result<Option<(T, Version)>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(item) => Ok(Some((item.decode()?, item.version))),
            None => Ok(None),
        }
    }
}

// Blanket implementation for all ItemStore implementations
impl<T: ItemStore + ?Sized> ItemStoreExt for T {}

/// Validates a batch before it is sent to the store.
pub fn validate_batch(writes: &[WriteItem], max_batch_size: usize) -> Result<()> {
    if writes.is_empty() {
        return Err(StoreError::EmptyBatch);
    }

    if writes.len() > max_batch_size {
        return Err(StoreError::BatchTooLarge {
            items: writes.len(),
            max: max_batch_size,
        });
    }

    // A key may be touched once per batch
    let mut seen = HashSet::with_capacity(writes.len());
    for write in writes {
        if !seen.insert(write.key()) {
            return Err(StoreError::DuplicateKey(write.key().to_string()));
        }
    }

    Ok(())
}
