//! Stored items, write operations and their preconditions.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::Version;

/// A single record in the item store.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Unique key, conventionally `<kind>#<id>`.
    pub key: String,

    /// The item body as JSON.
    pub value: serde_json::Value,

    /// Version stored with this write.
    pub version: Version,

    /// Expired items behave as if they were absent.
    pub expires_at: Option<DateTime<Utc>>,

    /// Set by the store when the item is written.
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Creates an item at the first version with no expiry.
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            version: Version::first(),
            expires_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Creates an item from a serializable value.
    pub fn from_serializable<T: Serialize>(
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(key, serde_json::to_value(value)?))
    }

    /// Sets the version this write will store.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets an absolute expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the item has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Deserializes the item body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// Precondition attached to a write. Evaluated against the live (unexpired)
/// item at commit time; if any precondition in a batch fails, nothing is
/// written.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Condition {
    /// Unconditional write.
    #[default]
    None,

    /// The key must be absent or expired.
    NotExists,

    /// The key must be present and unexpired.
    Exists,

    /// The key must be present at exactly this version.
    VersionEquals(Version),

    /// The key must be present and its top-level `attribute` must equal `value`.
    AttributeEquals {
        attribute: String,
        value: serde_json::Value,
    },
}

impl Condition {
    /// Evaluates the condition against the current live item.
    pub fn is_satisfied_by(&self, current: Option<&Item>) -> bool {
        match (self, current) {
            (Condition::None, _) => true,
            (Condition::NotExists, current) => current.is_none(),
            (Condition::Exists, current) => current.is_some(),
            (Condition::VersionEquals(expected), Some(item)) => item.version == *expected,
            (Condition::AttributeEquals { attribute, value }, Some(item)) => {
                item.value.get(attribute) == Some(value)
            }
            (Condition::VersionEquals(_) | Condition::AttributeEquals { .. }, None) => false,
        }
    }
}

/// One entry of an atomic write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteItem {
    Put { item: Item, condition: Condition },
    Delete { key: String, condition: Condition },
}

impl WriteItem {
    /// Unconditional put.
    pub fn put(item: Item) -> Self {
        WriteItem::Put {
            item,
            condition: Condition::None,
        }
    }

    /// Put that fails if the key already holds a live item.
    pub fn put_if_absent(item: Item) -> Self {
        WriteItem::Put {
            item,
            condition: Condition::NotExists,
        }
    }

    /// Put that fails unless the stored item is at `expected`.
    pub fn put_if_version(item: Item, expected: Version) -> Self {
        WriteItem::Put {
            item,
            condition: Condition::VersionEquals(expected),
        }
    }

    /// Put guarded by an arbitrary condition.
    pub fn put_if(item: Item, condition: Condition) -> Self {
        WriteItem::Put { item, condition }
    }

    /// Unconditional delete. Deleting an absent key is not an error.
    pub fn delete(key: impl Into<String>) -> Self {
        WriteItem::Delete {
            key: key.into(),
            condition: Condition::None,
        }
    }

    /// Delete guarded by a condition.
    pub fn delete_if(key: impl Into<String>, condition: Condition) -> Self {
        WriteItem::Delete {
            key: key.into(),
            condition,
        }
    }

    /// Returns the key this write targets.
    pub fn key(&self) -> &str {
        match self {
            WriteItem::Put { item, .. } => &item.key,
            WriteItem::Delete { key, .. } => key,
        }
    }

    /// Returns the precondition of this write.
    pub fn condition(&self) -> &Condition {
        match self {
            WriteItem::Put { condition, .. } | WriteItem::Delete { condition, .. } => condition,
        }
    }
}
