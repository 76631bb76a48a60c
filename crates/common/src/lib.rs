//! Shared identifiers and the ambient request context.

pub mod context;
pub mod types;

pub use context::Context;
pub use types::{EntityId, EventId, OperationId};
