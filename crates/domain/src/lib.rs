//! Domain layer for the knowledge-graph service.
//!
//! This crate provides:
//! - `Entity` and `DomainEvent` traits for stored entities and their events
//! - Graph, node and edge entities with field validation
//! - Repositories, including the transactional variant used by sagas
//! - `UnitOfWork`, the atomic write boundary with its outbox integration

pub mod entity;
pub mod error;
pub mod graph;
pub mod repository;
pub mod unit_of_work;

pub use entity::{DomainEvent, Entity};
pub use error::{DomainError, UnitOfWorkError};
pub use graph::{
    DEFAULT_GRAPH_NAME, Edge, Graph, GraphEvent, Node, UserGraphPointer, UserId, extract_keywords,
};
pub use repository::{Repository, StoreRepository, TransactionalRepository};
pub use unit_of_work::{CommitReceipt, RollbackError, TransactionState, UnitOfWork};
