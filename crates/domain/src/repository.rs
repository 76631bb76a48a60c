//! Entity persistence on top of the item store.

use std::marker::PhantomData;

use async_trait::async_trait;
use common::EntityId;
use store::{Item, ItemStore, ItemStoreExt, StoreError, WriteItem};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::unit_of_work::UnitOfWork;

/// Direct, non-transactional access to entities of one type.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Loads an entity with its stored version.
    async fn get(&self, id: EntityId) -> Result<Option<T>, DomainError>;

    /// Loads an entity or fails with [`DomainError::NotFound`].
    async fn require(&self, id: EntityId) -> Result<T, DomainError> {
        self.get(id).await?.ok_or(DomainError::NotFound {
            entity_type: T::entity_type(),
            id,
        })
    }

    /// Saves an entity, checked against the version it was loaded at.
    ///
    /// Returns the new version. Fails with [`DomainError::Conflict`] if
    /// someone else wrote the entity in between.
    async fn save(&self, entity: &T) -> Result<store::Version, DomainError>;

    /// Deletes an entity. Deleting a missing entity is not an error.
    async fn delete(&self, id: EntityId) -> Result<(), DomainError>;

    /// Lists all entities of this type, ordered by key.
    async fn list(&self) -> Result<Vec<T>, DomainError>;
}

/// A repository whose writes can join a [`UnitOfWork`].
///
/// Required at construction by anything that needs transactional saves, so a
/// repository without transaction support is rejected by the compiler.
pub trait TransactionalRepository<T: Entity>: Repository<T> {
    type Store: ItemStore;

    /// Buffers a version-checked save of `entity` into `uow`.
    fn register_save(&self, uow: &mut UnitOfWork<Self::Store>, entity: &T)
    -> Result<(), DomainError>;

    /// Buffers a delete of the entity with `id` into `uow`.
    fn register_delete(
        &self,
        uow: &mut UnitOfWork<Self::Store>,
        id: EntityId,
    ) -> Result<(), DomainError>;
}

/// Repository storing entities as JSON items under `<type>#<id>`.
pub struct StoreRepository<S, T>
where
    S: ItemStore,
    T: Entity,
{
    store: S,
    _phantom: PhantomData<fn() -> T>,
}

impl<S: ItemStore + Clone, T: Entity> Clone for StoreRepository<S, T> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, T> StoreRepository<S, T>
where
    S: ItemStore,
    T: Entity,
{
    /// Creates a new repository over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds the version-checked write that stores `entity`.
    ///
    /// A new entity must not exist yet; an existing one must still be at
    /// the version it was loaded at.
    pub fn save_write(entity: &T) -> Result<WriteItem, DomainError> {
        let current = entity.version();
        let item = Item::from_serializable(entity.key(), entity)?.with_version(current.next());
        Ok(if entity.is_new() {
            WriteItem::put_if_absent(item)
        } else {
            WriteItem::put_if_version(item, current)
        })
    }

    fn decode(item: &Item) -> Result<T, DomainError> {
        let mut entity: T = item.decode()?;
        entity.set_version(item.version);
        Ok(entity)
    }
}

#[async_trait]
impl<S, T> Repository<T> for StoreRepository<S, T>
where
    S: ItemStore,
    T: Entity + 'static,
{
    async fn get(&self, id: EntityId) -> Result<Option<T>, DomainError> {
        match self.store.get(&T::key_for(id)).await? {
            Some(item) => Ok(Some(Self::decode(&item)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, entity), fields(entity_type = T::entity_type(), id = %entity.id()))]
    async fn save(&self, entity: &T) -> Result<store::Version, DomainError> {
        let write = Self::save_write(entity)?;
        match self.store.transact_write(vec![write]).await {
            Ok(()) => Ok(entity.version().next()),
            Err(StoreError::ConditionFailed { .. }) => Err(DomainError::Conflict {
                entity_type: T::entity_type(),
                id: entity.id(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: EntityId) -> Result<(), DomainError> {
        self.store.delete_item(&T::key_for(id)).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<T>, DomainError> {
        self.store
            .query_prefix(&T::key_prefix())
            .await?
            .iter()
            .map(Self::decode)
            .collect()
    }
}

impl<S, T> TransactionalRepository<T> for StoreRepository<S, T>
where
    S: ItemStore,
    T: Entity + 'static,
{
    type Store = S;

    fn register_save(&self, uow: &mut UnitOfWork<S>, entity: &T) -> Result<(), DomainError> {
        uow.register_write(Self::save_write(entity)?)?;
        Ok(())
    }

    fn register_delete(&self, uow: &mut UnitOfWork<S>, id: EntityId) -> Result<(), DomainError> {
        uow.register_delete(T::key_for(id))?;
        Ok(())
    }
}
