//! Inventory command and query endpoints.
//!
//! Commands go straight to the aggregate; queries are served from whichever
//! projection instance the reader selector currently points at, so they are
//! eventually consistent with the commands.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AggregateId;
use domain::{
    CheckInItems, CommandResult, CreateInventoryItem, DeactivateInventoryItem, InventoryItem,
    RemoveItems, RenameInventoryItem,
};
use event_store::{EventStore, Version};
use projections::InventoryItemView;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateItemRequest {
    /// Client-chosen id; generated when absent.
    pub item_id: Option<String>,
    pub name: String,
}

#[derive(Deserialize)]
pub struct RenameItemRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CountRequest {
    pub count: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CommandResponse {
    pub item_id: String,
    /// Stream version after the command.
    pub version: Version,
}

impl CommandResponse {
    fn from_result(item_id: AggregateId, result: &CommandResult<InventoryItem>) -> Self {
        Self {
            item_id: item_id.to_string(),
            version: result.new_version,
        }
    }
}

// -- Handlers --

/// POST /inventory: create a new item.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let item_id = match req.item_id.as_deref() {
        Some(id) => parse_aggregate_id(id)?,
        None => AggregateId::new(),
    };

    let result = state
        .inventory
        .create_item(CreateInventoryItem::new(item_id, req.name))
        .await?;
    tracing::info!(%item_id, "inventory item created");

    Ok((
        StatusCode::CREATED,
        Json(CommandResponse::from_result(item_id, &result)),
    ))
}

/// POST /inventory/{id}/rename
#[tracing::instrument(skip(state, req))]
pub async fn rename<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RenameItemRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let item_id = parse_aggregate_id(&id)?;
    let result = state
        .inventory
        .rename_item(RenameInventoryItem::new(item_id, req.name))
        .await?;
    Ok(Json(CommandResponse::from_result(item_id, &result)))
}

/// POST /inventory/{id}/check-in
#[tracing::instrument(skip(state, req))]
pub async fn check_in<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let item_id = parse_aggregate_id(&id)?;
    let result = state
        .inventory
        .check_in(CheckInItems::new(item_id, req.count))
        .await?;
    Ok(Json(CommandResponse::from_result(item_id, &result)))
}

/// POST /inventory/{id}/remove
#[tracing::instrument(skip(state, req))]
pub async fn remove<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let item_id = parse_aggregate_id(&id)?;
    let result = state
        .inventory
        .remove(RemoveItems::new(item_id, req.count))
        .await?;
    Ok(Json(CommandResponse::from_result(item_id, &result)))
}

/// POST /inventory/{id}/deactivate
#[tracing::instrument(skip(state))]
pub async fn deactivate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let item_id = parse_aggregate_id(&id)?;
    let result = state
        .inventory
        .deactivate(DeactivateInventoryItem::new(item_id))
        .await?;
    Ok(Json(CommandResponse::from_result(item_id, &result)))
}

/// GET /inventory: all items in the selected instance.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<InventoryItemView>>, ApiError> {
    Ok(Json(state.items.list_items().await?))
}

/// GET /inventory/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<InventoryItemView>, ApiError> {
    let item_id = parse_aggregate_id(&id)?;
    state
        .items
        .get_item(item_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Inventory item {item_id} not found")))
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid item id '{id}': {e}")))
}
