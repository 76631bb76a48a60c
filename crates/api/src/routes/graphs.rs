//! Graph lookup endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Graph, Repository};
use store::ItemStore;

use super::parse_entity_id;
use crate::AppState;
use crate::error::ApiError;

/// GET /graphs/{id}
pub async fn get<S: ItemStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Graph>, ApiError> {
    let id = parse_entity_id(&id)?;
    Ok(Json(state.graphs.require(id).await?))
}
