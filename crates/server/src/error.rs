//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, InventoryError};
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Command handling error.
    Domain(DomainError),
    /// Read model or projection registry error.
    Projection(ProjectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Projection(err) => projection_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, %status, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    if err.is_concurrency_conflict() {
        return (StatusCode::CONFLICT, err.to_string());
    }
    match &err {
        DomainError::Inventory(inventory_err) => match inventory_err {
            InventoryError::NotCreated => (StatusCode::NOT_FOUND, err.to_string()),
            InventoryError::AlreadyCreated | InventoryError::Deactivated => {
                (StatusCode::CONFLICT, err.to_string())
            }
            InventoryError::NameRequired
            | InventoryError::InvalidCount { .. }
            | InventoryError::InsufficientStock { .. } => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
        },
        DomainError::AggregateNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn projection_error_to_response(err: ProjectionError) -> (StatusCode, String) {
    match &err {
        ProjectionError::NoInstance(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        ProjectionError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}
