//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use store::ItemStore;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Submitted node creations still running on this instance.
    pub operations_in_flight: usize,
}

/// GET /health
pub async fn check<S: ItemStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        operations_in_flight: state.coordinator.in_flight(),
    })
}
