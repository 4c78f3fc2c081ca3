//! Server entry point.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use event_store::{
    DocumentStore, EventStore, InMemoryDocumentStore, InMemoryEventStore, PostgresDocumentStore,
    PostgresEventStore,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use projections::{DocumentProjectionRegistry, INVENTORY_ITEMS_PROJECTION, ProjectionRegistry};
use server::{AppState, Config, LogFormat};
use sqlx::PgPool;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How often registry changes made by other processes are picked up.
const REGISTRY_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // 3. Pick storage and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPool::connect(&url).await?;
            let store = PostgresEventStore::new(pool.clone());
            store.run_migrations().await?;
            let listener = store.listen().await?;
            tracing::info!("using Postgres storage");

            let result = run(
                &config,
                store,
                Arc::new(PostgresDocumentStore::new(pool)),
                metrics_handle,
            )
            .await;
            listener.abort();
            result
        }
        None => {
            tracing::info!("using in-memory storage");
            run(
                &config,
                InMemoryEventStore::new(),
                Arc::new(InMemoryDocumentStore::new()),
                metrics_handle,
            )
            .await
        }
    }
}

async fn run<S: EventStore + Clone + 'static>(
    config: &Config,
    store: S,
    documents: Arc<dyn DocumentStore>,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    // 4. Registry, query side and projection worker
    let document_registry = Arc::new(DocumentProjectionRegistry::new(
        INVENTORY_ITEMS_PROJECTION,
        Arc::clone(&documents),
    ));
    let registry: Arc<dyn ProjectionRegistry> = document_registry.clone();

    let state = AppState::new(store.clone(), Arc::clone(&registry), Arc::clone(&documents)).await?;
    let worker = server::spawn_inventory_projection(store, registry, documents, config);

    let refresher = tokio::spawn(async move {
        let mut interval = tokio::time::interval(REGISTRY_REFRESH_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = document_registry.refresh().await {
                tracing::warn!(error = %e, "registry refresh failed");
            }
        }
    });

    // 5. Serve until a shutdown signal
    let app = server::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 6. Let the projection flush before exiting
    refresher.abort();
    match worker.stop().await {
        Ok(outcome) => tracing::info!(?outcome, "projection worker stopped"),
        Err(e) => tracing::error!(error = %e, "projection worker failed"),
    }

    served?;
    tracing::info!("server shut down gracefully");
    Ok(())
}
