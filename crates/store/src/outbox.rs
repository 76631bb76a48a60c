//! Outbox records: the durable "this event must be published" fact that is
//! written in the same atomic batch as the state change it describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Condition, EventEnvelope, EventId, Item, Version, WriteItem};

/// Key prefix of records still waiting for delivery.
pub const OUTBOX_PREFIX: &str = "outbox#";

/// Key prefix delivered records are moved to, out of the relay's scan.
pub const PUBLISHED_PREFIX: &str = "outbox-published#";

/// Delivery status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Recorded, not yet handed to the transport.
    #[default]
    Pending,
    /// Delivered by the relay.
    Published,
}

/// An event waiting in (or delivered from) the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub event: EventEnvelope,
    pub status: EventStatus,
    /// Number of failed delivery attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Wraps an event as a new pending record.
    pub fn pending(event: EventEnvelope) -> Self {
        Self {
            event,
            status: EventStatus::Pending,
            attempts: 0,
            last_error: None,
            published_at: None,
        }
    }

    /// Returns the store key for an event ID.
    pub fn key_for(event_id: EventId) -> String {
        format!("{OUTBOX_PREFIX}{event_id}")
    }

    /// Returns the store key of a delivered event.
    pub fn published_key_for(event_id: EventId) -> String {
        format!("{PUBLISHED_PREFIX}{event_id}")
    }

    /// Returns the store key of this record, which depends on its status.
    pub fn key(&self) -> String {
        match self.status {
            EventStatus::Pending => Self::key_for(self.event.event_id),
            EventStatus::Published => Self::published_key_for(self.event.event_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EventStatus::Pending
    }

    /// Converts the record into an item at the given version.
    pub fn to_item(&self, version: Version) -> Result<Item, serde_json::Error> {
        Ok(Item::from_serializable(self.key(), self)?.with_version(version))
    }

    /// Restores a record from a stored item.
    pub fn from_item(item: &Item) -> Result<Self, serde_json::Error> {
        item.decode()
    }

    /// The write that records a new pending event. Fails the batch if the
    /// event was already recorded.
    pub fn into_create(self) -> Result<WriteItem, serde_json::Error> {
        Ok(WriteItem::put_if_absent(self.to_item(Version::first())?))
    }

    /// Marks the record as delivered.
    pub fn mark_published(&mut self, at: DateTime<Utc>) {
        self.status = EventStatus::Published;
        self.published_at = Some(at);
        self.last_error = None;
    }

    /// The batch that moves a published record out of the pending prefix.
    /// It fails if the pending record is no longer at `read`.
    pub fn archive_writes(&self, read: Version) -> Result<Vec<WriteItem>, serde_json::Error> {
        Ok(vec![
            WriteItem::delete_if(
                Self::key_for(self.event.event_id),
                Condition::VersionEquals(read),
            ),
            WriteItem::put_if_absent(self.to_item(Version::first())?),
        ])
    }

    /// Records a failed delivery attempt; the record stays pending.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }
}
