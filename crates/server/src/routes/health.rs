//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Projection instance queries are currently served from.
    pub read_instance: Option<String>,
}

/// GET /health: the process is up. Reads may still be unavailable, which
/// shows as a missing `read_instance`.
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        read_instance: state.selector.selected().map(|s| s.instance),
    })
}
