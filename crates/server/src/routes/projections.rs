//! Projection registry inspection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::{EventStore, EventStoreToken};
use projections::ProjectionInstanceMetadata;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub metadata: ProjectionInstanceMetadata,
    /// Last event the instance has durably applied.
    pub token: EventStoreToken,
}

#[derive(Serialize)]
pub struct InstancesResponse {
    pub projection: String,
    /// Instance queries are currently served from, if any.
    pub selected: Option<String>,
    pub instances: Vec<InstanceResponse>,
}

/// GET /projections/{name}/instances
#[tracing::instrument(skip(state))]
pub async fn instances<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<InstancesResponse>, ApiError> {
    if name != state.registry.projection_name() {
        return Err(ApiError::NotFound(format!("Unknown projection '{name}'")));
    }

    let mut instances = Vec::new();
    for metadata in state.registry.get_all_metadata().await? {
        let token = state.registry.get_token(&metadata.name).await?;
        instances.push(InstanceResponse { metadata, token });
    }

    Ok(Json(InstancesResponse {
        projection: name,
        selected: state.selector.selected().map(|s| s.instance),
        instances,
    }))
}
