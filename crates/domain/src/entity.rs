//! Core entity and domain event traits.

use common::EntityId;
use serde::{Serialize, de::DeserializeOwned};
use store::{EventEnvelope, Version};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + Send + Sync + Clone {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the ID of the entity the event is about.
    fn aggregate_id(&self) -> EntityId;

    /// Returns the type of the entity the event is about.
    fn aggregate_type(&self) -> &'static str;

    /// Wraps the event in an envelope ready for the outbox.
    fn to_envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        EventEnvelope::from_payload(
            self.event_type(),
            self.aggregate_type(),
            self.aggregate_id(),
            self,
        )
    }
}

/// Trait for entities persisted as items in the store.
///
/// An entity is stored under `<entity_type>#<id>` and carries the version it
/// was loaded at, so a later save can be checked against concurrent writers.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the entity type name, used as the key prefix.
    fn entity_type() -> &'static str;

    /// Returns the entity's unique identifier.
    fn id(&self) -> EntityId;

    /// Returns the version the entity was loaded at, or
    /// [`Version::initial`] if it has never been stored.
    fn version(&self) -> Version;

    /// Sets the entity version.
    ///
    /// Called by repositories after loading or saving.
    fn set_version(&mut self, version: Version);

    /// Returns the key prefix shared by all entities of this type.
    fn key_prefix() -> String {
        format!("{}#", Self::entity_type())
    }

    /// Returns the store key for an entity ID.
    fn key_for(id: EntityId) -> String {
        format!("{}#{}", Self::entity_type(), id)
    }

    /// Returns the store key of this entity.
    fn key(&self) -> String {
        Self::key_for(self.id())
    }

    /// Returns true if the entity has never been stored.
    fn is_new(&self) -> bool {
        self.version() == Version::initial()
    }
}
