//! Aggregator Facade: the sole entry point. Owns one instance each of the
//! Registry, Session Manager, Tool Aggregator, and Router, plus the
//! consecutive-health-failure map, and dispatches every externally visible
//! operation to the right subsystem.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::capability::ToolStore;
use crate::aggregator::registry::{
    NewServer, Registry, ServerRecord, ServerStatus, TenantScope, TransportKind,
};
use crate::aggregator::router::{InvocationResult, Router, RoutingError};
use crate::aggregator::session_manager::{ConnectSpec, SessionManager};
use crate::aggregator::tool_aggregator::ToolAggregator;

/// Consecutive unhealthy probes, while `connected`, before a server is
/// demoted to `degraded`.
const DEGRADED_THRESHOLD: u32 = 3;
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error(transparent)]
    Registry(#[from] crate::aggregator::registry::RegistryError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

pub type Result<T> = std::result::Result<T, FacadeError>;

/// Input to `register_server`, matching `config::McpServerConfig` one level
/// up the stack without depending on the config module.
pub struct RegisterServerRequest {
    pub name: String,
    pub description: Option<String>,
    pub transport_kind: TransportKind,
    pub connection_config: serde_json::Value,
    pub health_check_address: Option<String>,
    pub tenant: TenantScope,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub server_id: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedState {
    pub total_servers: usize,
    pub connected_servers: usize,
    pub degraded_servers: usize,
    pub total_tools: usize,
}

/// Handle to the background health-monitor loop; dropping it does not stop
/// the loop — call `stop()` explicitly.
pub struct HealthMonitorHandle {
    cancellation: CancellationToken,
    join: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub async fn stop(self) {
        self.cancellation.cancel();
        let _ = self.join.await;
    }
}

pub struct Facade {
    registry: Arc<dyn Registry>,
    sessions: Arc<SessionManager>,
    aggregator: Arc<ToolAggregator>,
    router: Arc<Router>,
    tool_store: Arc<dyn ToolStore>,
    health_failures: Arc<DashMap<String, u32>>,
    health_interval: Duration,
}

impl Facade {
    pub fn new(
        registry: Arc<dyn Registry>,
        sessions: Arc<SessionManager>,
        aggregator: Arc<ToolAggregator>,
        router: Arc<Router>,
        tool_store: Arc<dyn ToolStore>,
        health_interval: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            aggregator,
            router,
            tool_store,
            health_failures: Arc::new(DashMap::new()),
            health_interval: if health_interval.is_zero() {
                DEFAULT_HEALTH_INTERVAL
            } else {
                health_interval
            },
        }
    }

    pub async fn register_server(&self, request: RegisterServerRequest) -> Result<ServerRecord> {
        let record = self
            .registry
            .add(NewServer {
                name: request.name,
                description: request.description,
                transport_kind: request.transport_kind,
                connection_config: request.connection_config,
                health_check_address: request.health_check_address,
                tenant: request.tenant,
            })
            .await?;
        Ok(record)
    }

    /// Idempotent: if the record is already `connected` and the Session
    /// Manager still has a live session, this is a no-op. Discovery is
    /// triggered after a fresh connect but its failure does not fail the
    /// connect itself.
    pub async fn connect_server(&self, id: &str) -> Result<bool> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| FacadeError::ServerNotFound(id.to_string()))?;

        if record.status == ServerStatus::Connected && self.sessions.is_connected(id) {
            return Ok(true);
        }

        let spec = connect_spec_from_record(&record);

        self.registry.update_status(id, ServerStatus::Connecting, None).await?;

        match self.sessions.connect(id, spec).await {
            Ok(()) => {
                self.registry.update_status(id, ServerStatus::Connected, None).await?;
                self.health_failures.remove(id);

                if let Err(e) = self.aggregator.discover_tools(id).await {
                    warn!("post-connect discovery failed for {}: {}", id, e);
                }

                Ok(true)
            }
            Err(e) => {
                self.registry
                    .update_status(id, ServerStatus::Error, Some(e.to_string()))
                    .await?;
                Ok(false)
            }
        }
    }

    pub async fn disconnect_server(&self, id: &str) -> Result<bool> {
        let _ = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| FacadeError::ServerNotFound(id.to_string()))?;

        let _ = self.sessions.disconnect(id).await;
        self.registry.update_status(id, ServerStatus::Disconnected, None).await?;
        Ok(true)
    }

    /// `remove_server` = disconnect + `remove_server_tools` + registry remove
    /// + purge from `health_failures`.
    pub async fn remove_server(&self, id: &str) -> Result<bool> {
        let _ = self.disconnect_server(id).await;

        if let Err(e) = self.aggregator.remove_server_tools(id).await {
            warn!("failed to remove tools for server {}: {}", id, e);
        }

        self.health_failures.remove(id);
        Ok(self.registry.remove(id).await)
    }

    pub async fn discover_tools(&self, id: &str) -> Result<usize> {
        let outcome = self
            .aggregator
            .discover_tools(id)
            .await
            .map_err(|e| FacadeError::ServerNotFound(e.to_string()))?;
        Ok(outcome.persisted)
    }

    pub async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        server_id: Option<&str>,
    ) -> Result<InvocationResult> {
        Ok(self.router.route(name, args, server_id).await?)
    }

    pub async fn search_tools(
        &self,
        query: &str,
        server_filter: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> Result<Vec<crate::aggregator::capability::ScoredToolPayload>> {
        self.aggregator
            .search_tools(query, server_filter, limit)
            .await
            .map_err(|e| FacadeError::ServerNotFound(e.to_string()))
    }

    /// Probes one server, or every `connected` server when `id` is absent.
    /// Resets the failure counter to zero on a healthy probe, increments it
    /// on failure, and demotes to `degraded` with a structured reason at
    /// three consecutive failures while still `connected`.
    pub async fn health_check(&self, id: Option<&str>) -> Vec<HealthResult> {
        let targets: Vec<ServerRecord> = match id {
            Some(id) => self.registry.get(id).await.into_iter().collect(),
            None => self.registry.list(Some(ServerStatus::Connected), None).await,
        };

        let mut results = Vec::with_capacity(targets.len());
        for server in targets {
            results.push(self.probe_one(&server).await);
        }
        results
    }

    async fn probe_one(&self, server: &ServerRecord) -> HealthResult {
        let started = std::time::Instant::now();
        let healthy = self.sessions.health_check(&server.id).await;
        let _ = self.registry.update_last_health_check(&server.id).await;

        crate::metrics::record_health_check(&server.id, healthy, started.elapsed());
        crate::metrics::update_backend_health(&server.id, server.transport_kind.as_wire_str(), healthy);

        if healthy {
            self.health_failures.remove(&server.id);
            return HealthResult {
                server_id: server.id.clone(),
                healthy: true,
                consecutive_failures: 0,
                reason: None,
            };
        }

        let mut count = self.health_failures.entry(server.id.clone()).or_insert(0);
        *count += 1;
        let consecutive = *count;
        drop(count);

        if consecutive >= DEGRADED_THRESHOLD && server.status == ServerStatus::Connected {
            let reason = format!("{} consecutive failed health probes", consecutive);
            let _ = self
                .registry
                .update_status(&server.id, ServerStatus::Degraded, Some(reason.clone()))
                .await;

            return HealthResult {
                server_id: server.id.clone(),
                healthy: false,
                consecutive_failures: consecutive,
                reason: Some(reason),
            };
        }

        HealthResult {
            server_id: server.id.clone(),
            healthy: false,
            consecutive_failures: consecutive,
            reason: None,
        }
    }

    /// Attempts `connect_server` on every server in `degraded` or `error`.
    pub async fn reconnect_unhealthy(&self) -> HashMap<String, bool> {
        let mut candidates = self.registry.list(Some(ServerStatus::Degraded), None).await;
        candidates.extend(self.registry.list(Some(ServerStatus::Error), None).await);

        let mut results = HashMap::with_capacity(candidates.len());
        for server in candidates {
            let ok = self.connect_server(&server.id).await.unwrap_or(false);
            results.insert(server.id, ok);
        }
        results
    }

    /// Launches a periodic sweep calling `health_check(None)` every 30s
    /// (configurable). Individual probe errors are absorbed inside
    /// `health_check` itself; this loop never panics on a backend failure.
    pub fn start_health_monitor(self: &Arc<Self>) -> HealthMonitorHandle {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let facade = self.clone();
        let interval = self.health_interval;

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let results = facade.health_check(None).await;
                        for r in &results {
                            if !r.healthy {
                                info!("health probe failed for {}: {} consecutive", r.server_id, r.consecutive_failures);
                            }
                        }
                    }
                }
            }
        });

        HealthMonitorHandle { cancellation, join }
    }

    pub async fn list_servers(&self, status: Option<ServerStatus>, tenant: Option<&str>) -> Vec<ServerRecord> {
        self.registry.list(status, tenant).await
    }

    pub async fn get_server(&self, id: &str) -> Option<ServerRecord> {
        self.registry.get(id).await
    }

    pub async fn get_state(&self) -> AggregatedState {
        let servers = self.registry.list(None, None).await;
        let connected = servers.iter().filter(|s| s.status == ServerStatus::Connected).count();
        let degraded = servers.iter().filter(|s| s.status == ServerStatus::Degraded).count();
        let total_tools = servers.iter().map(|s| s.tool_count).sum();

        AggregatedState {
            total_servers: servers.len(),
            connected_servers: connected,
            degraded_servers: degraded,
            total_tools,
        }
    }

    pub fn tool_store(&self) -> &Arc<dyn ToolStore> {
        &self.tool_store
    }
}

/// Translates a `ServerRecord`'s opaque `connection_config` blob + transport
/// kind into the Session Manager's typed `ConnectSpec`. The Registry never
/// validates this blob's shape, so missing fields fall back to empty rather
/// than panicking; a malformed config simply fails to connect downstream.
fn connect_spec_from_record(record: &ServerRecord) -> ConnectSpec {
    let cfg = &record.connection_config;

    match record.transport_kind {
        TransportKind::SubprocessPipes => ConnectSpec::Stdio {
            command: cfg
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            args: cfg
                .get("args")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            env: cfg
                .get("env")
                .and_then(|v| v.as_object())
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
        },
        TransportKind::ServerSentEventStream => ConnectSpec::Sse {
            url: cfg.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            headers: headers_from_value(cfg),
        },
        TransportKind::StreamableHttp => ConnectSpec::StreamableHttp {
            url: cfg.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            headers: headers_from_value(cfg),
        },
    }
}

fn headers_from_value(cfg: &serde_json::Value) -> HashMap<String, String> {
    cfg.get("headers")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
