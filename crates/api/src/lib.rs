//! HTTP API server for the knowledge-graph service.
//!
//! Node creation is asynchronous: `POST /nodes` submits a node-creation
//! saga and returns an operation ID to poll at `/operations/{id}`. The
//! server also exposes read endpoints for nodes and graphs, health and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{Graph, Node, StoreRepository};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{EventPublisher, OutboxRelay, RelayHandle};
use saga::{
    CleanupTask, InMemoryEdgeDiscovery, NodeCreationCoordinator, StoreOperationTracker,
    spawn_cleanup,
};
use store::ItemStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: ItemStore + Clone + 'static> {
    pub coordinator: NodeCreationCoordinator<S, StoreOperationTracker<S>>,
    pub nodes: StoreRepository<S, Node>,
    pub graphs: StoreRepository<S, Graph>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ItemStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/nodes", post(routes::nodes::create::<S>))
        .route("/nodes/{id}", get(routes::nodes::get::<S>))
        .route("/graphs/{id}", get(routes::graphs::get::<S>))
        .route("/operations/{id}", get(routes::operations::get::<S>))
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

/// Creates the application state over `store`.
///
/// `relay` is woken after every committed node creation.
pub fn create_state<S: ItemStore + Clone + 'static>(
    store: S,
    config: &Config,
    relay: Option<RelayHandle>,
) -> Arc<AppState<S>> {
    let tracker = Arc::new(StoreOperationTracker::new(
        store.clone(),
        config.operation_retention,
    ));
    let discovery = Arc::new(InMemoryEdgeDiscovery::new(store.clone()));
    let coordinator = NodeCreationCoordinator::new(
        store.clone(),
        tracker,
        discovery,
        relay,
        &config.node_creation_settings(),
    );

    Arc::new(AppState {
        coordinator,
        nodes: StoreRepository::new(store.clone()),
        graphs: StoreRepository::new(store),
    })
}

/// The outbox relay and operation cleanup loops.
pub struct BackgroundTasks {
    token: CancellationToken,
    relay: JoinHandle<()>,
    cleanup: CleanupTask,
}

impl BackgroundTasks {
    /// Stops both loops and waits for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.relay.await {
            tracing::warn!(error = %e, "outbox relay ended abnormally");
        }
        self.cleanup.stop().await;
    }
}

/// Creates the application state and starts its background loops.
///
/// The loops stop when `token` is cancelled or on
/// [`BackgroundTasks::shutdown`].
pub fn start<S, P>(
    store: S,
    publisher: P,
    config: &Config,
    token: CancellationToken,
) -> (Arc<AppState<S>>, BackgroundTasks)
where
    S: ItemStore + Clone + 'static,
    P: EventPublisher + 'static,
{
    let relay = Arc::new(OutboxRelay::new(store.clone(), publisher));
    let state = create_state(store, config, Some(relay.handle()));

    let relay = relay.spawn(token.child_token(), config.outbox_poll_interval);
    let cleanup = spawn_cleanup(
        Arc::clone(state.coordinator.tracker()),
        config.cleanup_interval,
        token.child_token(),
    );

    (
        state,
        BackgroundTasks {
            token,
            relay,
            cleanup,
        },
    )
}
