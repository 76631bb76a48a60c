//! Storage port for the knowledge-graph service.
//!
//! The backing store only offers small atomic batches of conditional writes.
//! Everything else in the workspace (unit of work, outbox, distributed lock,
//! operation tracking) is expressed in terms of [`ItemStore`].

pub mod error;
pub mod event;
pub mod item;
pub mod lock;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use common::EntityId;
pub use error::{Result, StoreError};
pub use event::{EventEnvelope, EventId, Version};
pub use item::{Condition, Item, WriteItem};
pub use lock::{DistributedLock, LOCK_PREFIX, LockError, LockOptions, lock_key};
pub use memory::InMemoryStore;
pub use outbox::{EventStatus, OUTBOX_PREFIX, OutboxRecord, PUBLISHED_PREFIX};
pub use postgres::PostgresStore;
pub use store::{DEFAULT_MAX_BATCH_SIZE, ItemStore, ItemStoreExt, validate_batch};
