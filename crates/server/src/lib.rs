//! HTTP server for the event-sourcing engine.
//!
//! Serves inventory commands and projection-backed queries, exposes the
//! projection registry and Prometheus metrics, and wires the projection
//! worker for this node's role.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, LogFormat};
pub use error::ApiError;
pub use state::{AppState, spawn_inventory_projection};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/inventory",
            post(routes::inventory::create::<S>).get(routes::inventory::list::<S>),
        )
        .route("/inventory/{id}", get(routes::inventory::get::<S>))
        .route(
            "/inventory/{id}/rename",
            post(routes::inventory::rename::<S>),
        )
        .route(
            "/inventory/{id}/check-in",
            post(routes::inventory::check_in::<S>),
        )
        .route(
            "/inventory/{id}/remove",
            post(routes::inventory::remove::<S>),
        )
        .route(
            "/inventory/{id}/deactivate",
            post(routes::inventory::deactivate::<S>),
        )
        .route(
            "/projections/{name}/instances",
            get(routes::projections::instances::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
