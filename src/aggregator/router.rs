//! Request Router: resolves a tool reference to a concrete
//! `(server_id, original_name)` pair, verifies the target is usable, forwards
//! the call with a bounded timeout, and returns a normalised result.
//!
//! `call_tool`'s cancellation contract is at-most-once and stays that way:
//! dropping the future that awaits `SessionManager::call_tool` abandons the
//! in-flight remote call. None of the three transports expose a cancel
//! frame, so there is nothing to upgrade this to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::aggregator::capability::ToolStore;
use crate::aggregator::registry::{Registry, ServerStatus};
use crate::aggregator::session_manager::SessionManager;
use crate::aggregator::tool_aggregator::parse_namespaced_name;

#[derive(Debug, Error, Clone)]
pub enum RoutingError {
    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("tool execution timed out: {0}")]
    Timeout(String),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("server disconnected during execution: {0}")]
    DisconnectedDuringExecution(String),
}

pub type Result<T> = std::result::Result<T, RoutingError>;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    ExplicitServer,
    NamespaceResolved,
    Fallback,
}

impl RoutingStrategy {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            RoutingStrategy::ExplicitServer => "explicit_server",
            RoutingStrategy::NamespaceResolved => "namespace_resolved",
            RoutingStrategy::Fallback => "fallback",
        }
    }
}

/// Created per invocation, discarded after reply.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub resolved_name: String,
    pub original_name: String,
    pub server_id: String,
    pub server_name: String,
    pub arguments: serde_json::Value,
    pub strategy: RoutingStrategy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub content: serde_json::Value,
    pub is_error: bool,
    pub execution_time_ms: u64,
    pub server_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub original_name: String,
}

pub struct Router {
    registry: Arc<dyn Registry>,
    sessions: Arc<SessionManager>,
    tool_store: Arc<dyn ToolStore>,
    call_timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<dyn Registry>,
        sessions: Arc<SessionManager>,
        tool_store: Arc<dyn ToolStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            tool_store,
            call_timeout: if call_timeout.is_zero() { DEFAULT_CALL_TIMEOUT } else { call_timeout },
        }
    }

    /// Resolution is checked in order: explicit server id, namespaced name,
    /// bare name falling back to a tool-repository lookup.
    async fn resolve(
        &self,
        name: &str,
        explicit_server_id: Option<&str>,
        arguments: serde_json::Value,
    ) -> Result<RoutingContext> {
        if let Some(server_id) = explicit_server_id {
            let server = self
                .registry
                .get(server_id)
                .await
                .ok_or_else(|| RoutingError::ServerNotFound(server_id.to_string()))?;

            let original_name = match self.tool_store.get_tool_by_name(name).await {
                Ok(Some(record)) if record.source_server_id == server.id => record.original_name,
                _ => name.to_string(),
            };

            return Ok(RoutingContext {
                resolved_name: name.to_string(),
                original_name,
                server_id: server.id,
                server_name: server.name,
                arguments,
                strategy: RoutingStrategy::ExplicitServer,
                created_at: Utc::now(),
            });
        }

        if let Some((server_name, original_name)) = parse_namespaced_name(name) {
            let server = self
                .registry
                .get_by_name(server_name)
                .await
                .ok_or_else(|| RoutingError::ServerNotFound(server_name.to_string()))?;

            return Ok(RoutingContext {
                resolved_name: name.to_string(),
                original_name: original_name.to_string(),
                server_id: server.id,
                server_name: server.name,
                arguments,
                strategy: RoutingStrategy::NamespaceResolved,
                created_at: Utc::now(),
            });
        }

        let record = self
            .tool_store
            .get_tool_by_name(name)
            .await
            .map_err(|e| RoutingError::ToolNotFound(e.to_string()))?
            .ok_or_else(|| RoutingError::ToolNotFound(name.to_string()))?;

        let server = self
            .registry
            .get(&record.source_server_id)
            .await
            .ok_or_else(|| RoutingError::ServerNotFound(record.source_server_id.clone()))?;

        Ok(RoutingContext {
            resolved_name: name.to_string(),
            original_name: record.original_name,
            server_id: server.id,
            server_name: server.name,
            arguments,
            strategy: RoutingStrategy::Fallback,
            created_at: Utc::now(),
        })
    }

    pub async fn route(
        &self,
        name: &str,
        arguments: serde_json::Value,
        explicit_server_id: Option<&str>,
    ) -> Result<InvocationResult> {
        let ctx = self.resolve(name, explicit_server_id, arguments).await?;

        let server = self
            .registry
            .get(&ctx.server_id)
            .await
            .ok_or_else(|| RoutingError::ServerNotFound(ctx.server_id.clone()))?;

        if server.status != ServerStatus::Connected {
            return Err(RoutingError::ServerUnavailable(ctx.server_id.clone()));
        }

        let started = Instant::now();

        let call = self
            .sessions
            .call_tool(&ctx.server_id, &ctx.original_name, ctx.arguments.clone());

        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => Err(RoutingError::Timeout(ctx.resolved_name.clone())),
            Ok(Err(e)) => {
                // Re-read: if the server has left `connected` the failure is
                // attributed to a mid-flight disconnect, not the tool itself.
                let still_connected = self
                    .registry
                    .get(&ctx.server_id)
                    .await
                    .map(|s| s.status == ServerStatus::Connected)
                    .unwrap_or(false);

                if still_connected {
                    Err(RoutingError::ExecutionFailed(e.to_string()))
                } else {
                    Err(RoutingError::DisconnectedDuringExecution(e.to_string()))
                }
            }
            Ok(Ok(result)) => Ok(result),
        }?;

        let execution_time_ms = started.elapsed().as_millis() as u64;

        Ok(InvocationResult {
            content: outcome.content,
            is_error: outcome.is_error,
            execution_time_ms,
            server_id: ctx.server_id,
            server_name: ctx.server_name,
            tool_name: ctx.resolved_name,
            original_name: ctx.original_name,
        })
    }
}
