use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    DEFAULT_MAX_BATCH_SIZE, Item, ItemStore, Result, StoreError, WriteItem, validate_batch,
};

/// In-memory item store implementation for testing and local runs.
///
/// Provides the same interface and atomicity guarantees as the PostgreSQL
/// implementation: a batch is checked in full under the write lock before any
/// of it is applied.
#[derive(Clone)]
pub struct InMemoryStore {
    items: Arc<RwLock<BTreeMap<String, Item>>>,
    max_batch_size: usize,
    failing_writes: Arc<AtomicUsize>,
    committed_batches: Arc<AtomicUsize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_max_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store with the default batch cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty in-memory store with a custom batch cap.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            items: Arc::new(RwLock::new(BTreeMap::new())),
            max_batch_size,
            failing_writes: Arc::new(AtomicUsize::new(0)),
            committed_batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of stored items, expired ones included.
    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Returns all stored keys, expired ones included.
    pub async fn keys(&self) -> Vec<String> {
        self.items.read().await.keys().cloned().collect()
    }

    /// Clears all items.
    pub async fn clear(&self) {
        self.items.write().await.clear();
    }

    /// Makes the next `count` calls to `transact_write` fail with
    /// `StoreError::Unavailable` without touching any data.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Returns the number of batches applied so far.
    pub fn committed_batches(&self) -> usize {
        self.committed_batches.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn transact_write(&self, writes: Vec<WriteItem>) -> Result<()> {
        validate_batch(&writes, self.max_batch_size)?;

        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut items = self.items.write().await;
        let now = Utc::now();

        // Check every precondition before applying anything
        for write in &writes {
            let current = items
                .get(write.key())
                .filter(|item| !item.is_expired_at(now));
            if !write.condition().is_satisfied_by(current) {
                return Err(StoreError::ConditionFailed {
                    key: write.key().to_string(),
                });
            }
        }

        for write in writes {
            match write {
                WriteItem::Put { mut item, .. } => {
                    item.updated_at = now;
                    items.insert(item.key.clone(), item);
                }
                WriteItem::Delete { key, .. } => {
                    items.remove(&key);
                }
            }
        }

        self.committed_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        let items = self.items.read().await;
        let now = Utc::now();
        Ok(items
            .get(key)
            .filter(|item| !item.is_expired_at(now))
            .cloned())
    }

    async fn query_prefix(&self, prefix: &str) -> Result<Vec<Item>> {
        let items = self.items.read().await;
        let now = Utc::now();
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, item)| !item.is_expired_at(now))
            .map(|(_, item)| item.clone())
            .collect())
    }
}
