//! Node submission and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OperationId;
use domain::graph::validate_content;
use domain::{Node, Repository, UserId};
use saga::CreateNodeRequest;
use serde::Serialize;
use store::ItemStore;

use super::parse_entity_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct NodeSubmittedResponse {
    pub operation_id: OperationId,
    /// Where to poll for the outcome.
    pub status_url: String,
}

/// POST /nodes
///
/// Checks the request shape, then runs node creation in the background and
/// answers `202 Accepted` with the operation to poll.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: ItemStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<NodeSubmittedResponse>), ApiError> {
    UserId::new(req.user_id.as_str())?;
    validate_content(&req.content)?;

    let operation_id = state.coordinator.submit(req).await?;
    metrics::counter!("api_nodes_submitted_total").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(NodeSubmittedResponse {
            operation_id,
            status_url: format!("/operations/{operation_id}"),
        }),
    ))
}

/// GET /nodes/{id}
pub async fn get<S: ItemStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    let id = parse_entity_id(&id)?;
    Ok(Json(state.nodes.require(id).await?))
}
