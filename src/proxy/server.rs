//! Main proxy server implementation using Axum web framework.
//!
//! This module initializes the HTTP server with all required middleware,
//! routes, and shared application state. The request surface is a thin
//! JSON-RPC front door onto the [`crate::aggregator::Facade`], plus a small
//! set of admin routes for server lifecycle management.

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    aggregator::{self, Facade, HealthMonitorHandle},
    config::Config,
    error::{Error, Result},
    metrics::Metrics,
    proxy::handler::{self, health_check},
};

/// Main proxy server structure containing all shared state and configuration.
pub struct ProxyServer {
    config: Arc<Config>,
    facade: Arc<Facade>,
    metrics: Arc<Metrics>,
    health_monitor: HealthMonitorHandle,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub facade: Arc<Facade>,
    pub metrics: Arc<Metrics>,
}

impl ProxyServer {
    /// Initialize a new proxy server with the given configuration. Builds a
    /// fully-wired Facade (with null-object collaborators — embedded mode has
    /// no relational/vector/classifier backend configured) and registers
    /// every configured backend, auto-connecting the ones marked for it.
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing Only1MCP proxy server");

        let facade = aggregator::build_facade(
            &config.servers,
            &config.aggregator,
            Arc::new(aggregator::NullToolStore),
            Arc::new(aggregator::NullVectorStore),
            Arc::new(aggregator::NullEmbedder::new(config.aggregator.embedding_dimension)),
            Arc::new(aggregator::NullSkillClassifier),
            Arc::new(aggregator::NullEventSink),
        )
        .await?;

        let health_monitor = facade.start_health_monitor();
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            facade,
            metrics,
            health_monitor,
            shutdown_tx,
        })
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let app_state = AppState {
            config: self.config.clone(),
            facade: self.facade.clone(),
            metrics: self.metrics.clone(),
        };

        let mcp_routes = Router::new()
            .route("/", post(handler::handle_jsonrpc_request))
            .route("/mcp", post(handler::handle_jsonrpc_request))
            .route("/health", get(health_check));

        let admin_routes = Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(crate::metrics::metrics_handler))
            .route("/state", get(handler::admin_get_state))
            .route("/servers", get(handler::admin_list_servers))
            .route("/servers", post(handler::admin_register_server))
            .route("/servers/:id", get(handler::admin_get_server))
            .route("/servers/:id", delete(handler::admin_remove_server))
            .route("/servers/:id/connect", post(handler::admin_connect_server))
            .route("/servers/:id/disconnect", post(handler::admin_disconnect_server))
            .route("/servers/:id/discover", post(handler::admin_discover_tools))
            .route("/reconnect_unhealthy", post(handler::admin_reconnect_unhealthy));

        Router::new()
            .nest("/", mcp_routes)
            .nest("/api/v1/admin", admin_routes)
            .layer(
                ServiceBuilder::new()
                    .layer(CorsLayer::permissive())
                    .layer(CompressionLayer::new())
                    .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(30)))
                    .layer(TraceLayer::new_for_http()),
            )
            .with_state(app_state)
    }

    /// Start the proxy server and begin accepting connections.
    pub async fn run(self) -> Result<()> {
        let router = self.build_router();

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        info!("Starting Only1MCP proxy server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind: {}", e)))?;

        info!("Server listening on {}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutting down proxy server gracefully...");
            })
            .await
            .map_err(|e| Error::Server(format!("Server error: {}", e)))?;

        self.health_monitor.stop().await;
        info!("Proxy server stopped");
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
