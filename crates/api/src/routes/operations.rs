//! Operation status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OperationId;
use saga::{OperationRecord, TrackerError};
use store::ItemStore;

use crate::AppState;
use crate::error::ApiError;

/// GET /operations/{id}
///
/// Answers from the shared store, so any instance can serve the poll.
pub async fn get<S: ItemStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OperationRecord>, ApiError> {
    let operation_id: OperationId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid operation id '{id}': {e}")))?;

    state
        .coordinator
        .status(operation_id)
        .await?
        .map(Json)
        .ok_or(ApiError::Tracker(TrackerError::NotFound(operation_id)))
}
