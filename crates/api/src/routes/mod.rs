//! HTTP route handlers.

pub mod graphs;
pub mod health;
pub mod metrics;
pub mod nodes;
pub mod operations;

use common::EntityId;

use crate::error::ApiError;

/// Parses an entity ID from a path segment.
pub(crate) fn parse_entity_id(raw: &str) -> Result<EntityId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid id '{raw}': {e}")))
}
