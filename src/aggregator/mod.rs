//! MCP server aggregator core: Server Registry, Session Manager, Tool
//! Aggregator, and Request Router, orchestrated by the [`Facade`].
//!
//! Dependency order, leaves first: transport clients feed the Session
//! Manager; the relational and vector repositories feed the Tool
//! Aggregator; the Registry feeds the Router; all four feed the Facade.

pub mod capability;
pub mod facade;
pub mod registry;
pub mod router;
pub mod session_manager;
pub mod tool_aggregator;

pub use capability::{
    Embedder, EventSink, NullEmbedder, NullEventSink, NullSkillClassifier, NullToolStore,
    NullVectorStore, SkillClassifier, ToolStore, VectorStore,
};
pub use facade::{AggregatedState, Facade, FacadeError, HealthMonitorHandle, HealthResult, RegisterServerRequest};
pub use registry::{InMemoryRegistry, Registry, ServerRecord, ServerStatus, TenantScope, TransportKind};
pub use router::Router;
pub use session_manager::{ConnectSpec, SessionManager};
pub use tool_aggregator::ToolAggregator;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AggregatorConfig, McpServerConfig, TransportConfig};

/// Builds a fully-wired [`Facade`] with in-memory/null collaborators for
/// every capability the caller doesn't supply, and registers (but does not
/// connect) every server named in `servers`.
pub async fn build_facade(
    servers: &[McpServerConfig],
    aggregator_config: &AggregatorConfig,
    tool_store: Arc<dyn ToolStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn SkillClassifier>,
    events: Arc<dyn EventSink>,
) -> crate::error::Result<Arc<Facade>> {
    let registry: Arc<dyn Registry> = Arc::new(InMemoryRegistry::new(events));
    let sessions = Arc::new(SessionManager::new(
        Duration::from_secs(aggregator_config.connect_timeout_secs),
        Duration::from_secs(aggregator_config.call_timeout_secs),
    ));

    let aggregator = Arc::new(ToolAggregator::new(
        registry.clone(),
        sessions.clone(),
        tool_store.clone(),
        vector_store,
        embedder,
        classifier,
    ));

    let router = Arc::new(Router::new(
        registry.clone(),
        sessions.clone(),
        tool_store.clone(),
        Duration::from_secs(aggregator_config.call_timeout_secs),
    ));

    let facade = Arc::new(Facade::new(
        registry.clone(),
        sessions,
        aggregator,
        router,
        tool_store,
        Duration::from_secs(aggregator_config.health_interval_secs),
    ));

    for server in servers.iter().filter(|s| s.enabled) {
        let (transport_kind, connection_config) = transport_to_registry_shape(&server.transport);

        let request = RegisterServerRequest {
            name: server.name.clone(),
            description: None,
            transport_kind,
            connection_config,
            health_check_address: server.health_check_address.clone(),
            tenant: if server.tenant.is_global {
                TenantScope::global()
            } else {
                match &server.tenant.org_id {
                    Some(org) => TenantScope::tenant(org.clone()),
                    None => TenantScope::global(),
                }
            },
        };

        match facade.register_server(request).await {
            Ok(record) if server.auto_connect => {
                if !facade.connect_server(&record.id).await.unwrap_or(false) {
                    tracing::warn!("auto-connect failed for server {}", server.name);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("failed to register server {}: {}", server.name, e),
        }
    }

    Ok(facade)
}

fn transport_to_registry_shape(transport: &TransportConfig) -> (TransportKind, serde_json::Value) {
    match transport {
        TransportConfig::Stdio { command, args, env } => (
            TransportKind::SubprocessPipes,
            serde_json::json!({"command": command, "args": args, "env": env}),
        ),
        TransportConfig::Sse { url, headers, .. } => (
            TransportKind::ServerSentEventStream,
            serde_json::json!({"url": url, "headers": headers}),
        ),
        TransportConfig::StreamableHttp { url, headers, .. } | TransportConfig::Http { url, headers, .. } => (
            TransportKind::StreamableHttp,
            serde_json::json!({"url": url, "headers": headers}),
        ),
    }
}
