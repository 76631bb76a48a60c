//! Errors returned by handlers, rendered as `{"error": "..."}` bodies.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::TrackerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Operation records could not be read or written.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_)
            | Self::Domain(DomainError::NotFound { .. })
            | Self::Tracker(TrackerError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Domain(DomainError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Domain(DomainError::Conflict { .. }) => StatusCode::CONFLICT,
            Self::Domain(_) | Self::Tracker(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EntityId, OperationId};

    #[test]
    fn domain_errors_map_to_client_statuses() {
        let not_found = ApiError::from(DomainError::NotFound {
            entity_type: "node",
            id: EntityId::new(),
        });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid = ApiError::from(DomainError::Validation("content must not be empty".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.to_string(), "Validation error: content must not be empty");
    }

    #[test]
    fn missing_operation_is_not_found() {
        let response = ApiError::from(TrackerError::NotFound(OperationId::new())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_are_server_errors() {
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
