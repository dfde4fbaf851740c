//! Session Manager: opens, supervises, and cleanly closes one live session
//! per connected backend across the three supported transports.
//!
//! The key design decision is lifetime discipline. The streamable-HTTP and
//! SSE transport clients are plain request/response objects the Session
//! Manager can hold directly. The STDIO transport is different: spawning and
//! piping a child process is a scoped resource whose internal worker tasks
//! are tied to the scope that opened it. To hold a STDIO session open across
//! many unrelated `call_tool`s, the Session Manager starts a detached
//! supervisor task per server id that opens the pipes, initialises the MCP
//! handshake, publishes readiness back to the caller, then parks on a
//! `CancellationToken` until `disconnect` cancels it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::transport::sse::{SseTransport, SseTransportConfig, SseTransportPool};
use crate::transport::stdio::{StdioConfig, StdioTransport, TransportError as StdioTransportError};
use crate::transport::streamable_http::{
    StreamableHttpConfig, StreamableHttpError, StreamableHttpTransport, StreamableHttpTransportPool,
};
use crate::types::{McpRequest, ServerId};

const CONNECT_RETRIES: u32 = 3;
const CONNECT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// The supervisor task parks here between cancellation checks. An hour is
/// arbitrary — it only exists so the task periodically wakes and re-checks
/// the cancellation token rather than sleeping forever; cooperative
/// cancellation wakes it early in the normal case.
const SUPERVISOR_PARK: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("initialise timed out after {0}ms")]
    InitializeTimeout(u64),

    #[error("server {0} is not connected")]
    NotConnected(String),

    #[error("call failed: {0}")]
    CallFailed(String),

    #[error("call timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Transport-specific connection config handed to `connect`. This is the
/// typed counterpart of `config::TransportConfig`/`ServerRecord.connection_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// A tool entry as returned (and normalised) from a `tools/list` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Normalised result of a `call_tool` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub content: serde_json::Value,
    pub is_error: bool,
}

enum ConnectionHandle {
    Stdio {
        cancellation: CancellationToken,
        supervisor: JoinHandle<()>,
    },
    Sse {
        transport: Arc<SseTransport>,
        endpoint: String,
    },
    StreamableHttp {
        transport: Arc<StreamableHttpTransport>,
    },
}

/// Live, never-observed-outside-this-module connection state for one server.
struct ManagedConnection {
    handle: ConnectionHandle,
}

/// Opens, supervises, and closes sessions for every connected backend.
pub struct SessionManager {
    connections: DashMap<ServerId, ManagedConnection>,
    stdio: Arc<StdioTransport>,
    sse_pool: Arc<SseTransportPool>,
    http_pool: Arc<StreamableHttpTransportPool>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl SessionManager {
    pub fn new(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            stdio: Arc::new(StdioTransport::new()),
            sse_pool: Arc::new(SseTransportPool::default()),
            http_pool: Arc::new(StreamableHttpTransportPool::new()),
            connect_timeout,
            call_timeout,
        }
    }

    /// Attempts up to three tries with 1s/2s/4s back-off between them.
    pub async fn connect(&self, id: &str, spec: ConnectSpec) -> Result<()> {
        let mut last_err = None;

        for (attempt, backoff) in std::iter::once(None)
            .chain(CONNECT_BACKOFF.iter().copied().map(Some))
            .take(CONNECT_RETRIES as usize)
            .enumerate()
        {
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }

            match self.connect_once(id, spec.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("connect attempt {} failed for {}: {}", attempt + 1, id, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SessionError::ConnectionFailed("unknown".to_string())))
    }

    async fn connect_once(&self, id: &str, spec: ConnectSpec) -> Result<()> {
        match spec {
            ConnectSpec::Stdio { command, args, env } => self.connect_stdio(id, command, args, env).await,
            ConnectSpec::Sse { url, headers } => self.connect_sse(id, url, headers).await,
            ConnectSpec::StreamableHttp { url, headers } => {
                self.connect_streamable_http(id, url, headers).await
            }
        }
    }

    async fn connect_stdio(
        &self,
        id: &str,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<()> {
        let cancellation = CancellationToken::new();
        let child_cancellation = cancellation.clone();
        let stdio = self.stdio.clone();
        let server_id = id.to_string();
        let timeout_ms = self.connect_timeout.as_millis() as u64;

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let supervisor = tokio::spawn(async move {
            let config = StdioConfig {
                command,
                args,
                env,
                cwd: None,
                timeout_ms,
                max_memory_mb: Some(512),
                max_cpu_percent: Some(50),
                sandbox: true,
            };

            // tools/list with id 0 doubles as the readiness probe: it forces
            // send_request_with_config to run the initialize handshake if the
            // connection isn't Ready yet.
            let probe = McpRequest::new("tools/list", serde_json::json!({}), Some(serde_json::json!(0)));
            let result = stdio
                .send_request_with_config(server_id.clone(), &config, probe)
                .await
                .map(|_| ())
                .map_err(stdio_error_to_session_error);

            let ready_ok = result.is_ok();
            let _ = ready_tx.send(result);

            if ready_ok {
                loop {
                    tokio::select! {
                        _ = child_cancellation.cancelled() => break,
                        _ = tokio::time::sleep(SUPERVISOR_PARK) => continue,
                    }
                }
            }

            if let Err(e) = stdio.kill_process(&server_id).await {
                warn!("failed to kill stdio process for {}: {}", server_id, e);
            }
        });

        let ready = match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Err(_) => {
                // The outer wait itself timed out before the supervisor ever
                // signalled readiness: cancel it and await its teardown so
                // the partially-acquired process doesn't leak, per spec
                // §4.2's "any timeout ... during initialise rolls back the
                // partial acquisition."
                cancellation.cancel();
                let _ = supervisor.await;
                return Err(SessionError::InitializeTimeout(timeout_ms));
            }
            Ok(Err(_)) => {
                return Err(SessionError::ConnectionFailed("supervisor task dropped".to_string()));
            }
            Ok(Ok(ready)) => ready,
        };

        if let Err(e) = ready {
            cancellation.cancel();
            let _ = supervisor.await;
            return Err(e);
        }

        self.connections.insert(
            id.to_string(),
            ManagedConnection {
                handle: ConnectionHandle::Stdio { cancellation, supervisor },
            },
        );
        info!("stdio session ready for {}", id);
        Ok(())
    }

    async fn connect_sse(&self, id: &str, url: String, headers: HashMap<String, String>) -> Result<()> {
        let config = SseTransportConfig {
            base_url: url.clone(),
            request_timeout: self.connect_timeout,
            headers: headers.clone(),
        };
        let transport = Arc::new(
            SseTransport::new(config)
                .await
                .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?,
        );

        let init = McpRequest::new(
            "initialize",
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "only1mcp", "version": env!("CARGO_PKG_VERSION")},
            }),
            Some(serde_json::json!(0)),
        );

        tokio::time::timeout(self.connect_timeout, transport.send_request(&url, init))
            .await
            .map_err(|_| SessionError::InitializeTimeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        // register in the pool too, so other code reaching through the pool
        // sees the same cached transport.
        let _ = self.sse_pool.get_or_create(&url, headers).await;

        self.connections.insert(
            id.to_string(),
            ManagedConnection {
                handle: ConnectionHandle::Sse { transport, endpoint: url },
            },
        );
        Ok(())
    }

    async fn connect_streamable_http(
        &self,
        id: &str,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        let config = StreamableHttpConfig {
            url: url.clone(),
            headers,
            timeout_ms: self.connect_timeout.as_millis() as u64,
        };
        let transport = self.http_pool.get_or_create(config);

        let init = McpRequest::new(
            "initialize",
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "only1mcp", "version": env!("CARGO_PKG_VERSION")},
            }),
            Some(serde_json::json!(0)),
        );

        tokio::time::timeout(self.connect_timeout, transport.send_request(init))
            .await
            .map_err(|_| SessionError::InitializeTimeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e: StreamableHttpError| SessionError::ConnectionFailed(e.to_string()))?;

        self.connections.insert(
            id.to_string(),
            ManagedConnection {
                handle: ConnectionHandle::StreamableHttp { transport },
            },
        );
        Ok(())
    }

    /// Idempotent; releases all resources and removes the local handle.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        if let Some((_, conn)) = self.connections.remove(id) {
            match conn.handle {
                ConnectionHandle::Stdio { cancellation, supervisor } => {
                    cancellation.cancel();
                    if tokio::time::timeout(Duration::from_secs(10), supervisor)
                        .await
                        .is_err()
                    {
                        warn!("stdio supervisor for {} did not shut down within 10s", id);
                    }
                }
                ConnectionHandle::Sse { .. } | ConnectionHandle::StreamableHttp { .. } => {
                    // request/response clients hold no scoped resource beyond
                    // the pooled HTTP client; dropping our reference is enough.
                }
            }
        }
        Ok(())
    }

    pub async fn reconnect(&self, id: &str, spec: ConnectSpec) -> Result<()> {
        self.disconnect(id).await?;
        self.connect(id, spec).await
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Proxies `tools/list` on the named session and normalises the result
    /// shape. `id = None` fans out to every currently connected session.
    pub async fn list_tools(&self, id: Option<&str>) -> Result<Vec<DiscoveredTool>> {
        match id {
            Some(id) => self.list_tools_one(id).await,
            None => {
                let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
                let mut all = Vec::new();
                for id in ids {
                    if let Ok(tools) = self.list_tools_one(&id).await {
                        all.extend(tools);
                    }
                }
                Ok(all)
            }
        }
    }

    async fn list_tools_one(&self, id: &str) -> Result<Vec<DiscoveredTool>> {
        let request = McpRequest::new("tools/list", serde_json::json!({}), Some(serde_json::json!(1)));
        let response = self.send(id, request).await?;
        Ok(normalise_tools_list(&response))
    }

    /// Proxies invocation to the named session and normalises `{content, is_error}`.
    pub async fn call_tool(
        &self,
        id: &str,
        original_name: &str,
        args: serde_json::Value,
    ) -> Result<CallResult> {
        let request = McpRequest::new(
            "tools/call",
            serde_json::json!({"name": original_name, "arguments": args}),
            Some(serde_json::json!(uuid::Uuid::new_v4().to_string())),
        );

        let response = tokio::time::timeout(self.call_timeout, self.send(id, request))
            .await
            .map_err(|_| SessionError::Timeout)??;

        Ok(normalise_call_result(&response))
    }

    /// Probes by issuing `tools/list`; returns bool rather than an error.
    pub async fn health_check(&self, id: &str) -> bool {
        self.list_tools_one(id).await.is_ok()
    }

    async fn send(&self, id: &str, request: McpRequest) -> Result<crate::types::McpResponse> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| SessionError::NotConnected(id.to_string()))?;

        match &conn.handle {
            ConnectionHandle::Stdio { .. } => {
                let config = StdioConfig {
                    command: String::new(),
                    args: vec![],
                    env: HashMap::new(),
                    cwd: None,
                    timeout_ms: self.call_timeout.as_millis() as u64,
                    max_memory_mb: None,
                    max_cpu_percent: None,
                    sandbox: true,
                };
                self.stdio
                    .send_request_with_config(id.to_string(), &config, request)
                    .await
                    .map_err(stdio_error_to_session_error)
            }
            ConnectionHandle::Sse { transport, endpoint } => transport
                .send_request(endpoint, request)
                .await
                .map_err(|e| SessionError::CallFailed(e.to_string())),
            ConnectionHandle::StreamableHttp { transport } => transport
                .send_request(request)
                .await
                .map_err(|e| SessionError::CallFailed(e.to_string())),
        }
    }
}

fn stdio_error_to_session_error(err: StdioTransportError) -> SessionError {
    match err {
        StdioTransportError::Timeout => SessionError::Timeout,
        other => SessionError::ConnectionFailed(other.to_string()),
    }
}

fn normalise_tools_list(response: &crate::types::McpResponse) -> Vec<DiscoveredTool> {
    let Some(result) = &response.result else {
        return Vec::new();
    };
    let Some(tools) = result.get("tools").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            let description = t
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let input_schema = t
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            Some(DiscoveredTool { name, description, input_schema })
        })
        .collect()
}

fn normalise_call_result(response: &crate::types::McpResponse) -> CallResult {
    if let Some(error) = &response.error {
        return CallResult {
            content: serde_json::json!([{"type": "text", "text": error.message}]),
            is_error: true,
        };
    }

    let result = response.result.clone().unwrap_or(serde_json::json!({}));
    let content = result
        .get("content")
        .cloned()
        .unwrap_or_else(|| serde_json::json!([]));
    let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
    CallResult { content, is_error }
}
