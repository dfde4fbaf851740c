//! JSON-RPC dispatch onto the [`Facade`](crate::aggregator::Facade), plus a
//! small set of admin routes for server lifecycle management.
//!
//! The MCP surface here is deliberately narrow: `tools/list` and
//! `tools/call` are the only two JSON-RPC methods the Facade backs.
//! `tools/list` is implemented as an empty-query `search_tools` call — the
//! Facade's only read path over the tool catalogue is the vector-backed
//! search, so a catalogue listing and a catalogue search are the same
//! operation here with an empty query string. Full per-tool descriptions and
//! input schemas require reading the relational `ToolStore` directly, which
//! has no "list everything" operation by design (see `aggregator::capability`);
//! callers that need those should query the wired `ToolStore` out of band.
//! `resources/*`, `prompts/*`, and `sampling/*` have no Facade counterpart
//! and are not exposed — the aggregator's contract is tools-only.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

use crate::aggregator::{RegisterServerRequest, ServerRecord, ServerStatus, TenantScope, TransportKind};
use crate::error::ProxyError;
use crate::proxy::server::AppState;
use crate::types::{McpError, McpRequest, McpResponse};

pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn handle_jsonrpc_request(
    State(state): State<AppState>,
    Json(request): Json<McpRequest>,
) -> Json<McpResponse> {
    let started = Instant::now();
    let method = request.method().to_string();
    let id = request.id.clone();

    let outcome = match method.as_str() {
        "tools/list" => handle_tools_list(&state, request.params.clone()).await,
        "tools/call" => handle_tools_call(&state, request.params.clone()).await,
        other => Err(ProxyError::InvalidRequest(format!("unsupported method: {}", other))),
    };

    state.metrics.record_request(
        "aggregator",
        &method,
        if outcome.is_ok() { "success" } else { "error" },
        started.elapsed(),
    );

    match outcome {
        Ok(result) => Json(McpResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }),
        Err(e) => Json(McpResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code: -32000,
                message: e.to_string(),
                data: None,
            }),
        }),
    }
}

async fn handle_tools_list(state: &AppState, params: Option<Value>) -> Result<Value, ProxyError> {
    let query = params
        .as_ref()
        .and_then(|p| p.get("query"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let server_filter = params
        .as_ref()
        .and_then(|p| p.get("server_name"))
        .and_then(|v| v.as_str())
        .map(|s| vec![s.to_string()]);

    let limit = params
        .as_ref()
        .and_then(|p| p.get("limit"))
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .or(Some(state.config.aggregator.default_search_limit));

    let hits = state.facade.search_tools(&query, server_filter, limit).await?;

    let tools: Vec<Value> = hits
        .into_iter()
        .map(|hit| {
            json!({
                "name": format!("{}.{}", hit.payload.server_name, hit.payload.original_name),
                "description": "",
                "inputSchema": {},
                "score": hit.score,
            })
        })
        .collect();

    Ok(json!({ "tools": tools }))
}

async fn handle_tools_call(state: &AppState, params: Option<Value>) -> Result<Value, ProxyError> {
    let params = params.ok_or_else(|| ProxyError::InvalidRequest("missing params".to_string()))?;

    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProxyError::InvalidRequest("missing \"name\"".to_string()))?;

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let server_id = params.get("server_id").and_then(|v| v.as_str());

    let outcome = state.facade.execute_tool(name, arguments, server_id).await?;

    Ok(json!({
        "content": outcome.content,
        "isError": outcome.is_error,
        "_meta": {
            "executionTimeMs": outcome.execution_time_ms,
            "serverId": outcome.server_id,
            "serverName": outcome.server_name,
            "toolName": outcome.tool_name,
            "originalName": outcome.original_name,
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListServersQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
}

pub async fn admin_list_servers(
    State(state): State<AppState>,
    Query(q): Query<ListServersQuery>,
) -> Json<Vec<ServerRecord>> {
    let status = q.status.as_deref().and_then(ServerStatus::from_wire_str);
    let servers = state.facade.list_servers(status, q.tenant.as_deref()).await;
    Json(servers)
}

pub async fn admin_get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerRecord>, ProxyError> {
    state
        .facade
        .get_server(&id)
        .await
        .map(Json)
        .ok_or_else(|| ProxyError::NoBackendAvailable(id))
}

pub async fn admin_get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.facade.get_state().await)
}

#[derive(Debug, Deserialize)]
pub struct RegisterServerBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub transport_kind: String,
    #[serde(default)]
    pub connection_config: Value,
    #[serde(default)]
    pub health_check_address: Option<String>,
    #[serde(default)]
    pub tenant: Option<TenantScope>,
    #[serde(default)]
    pub auto_connect: bool,
}

pub async fn admin_register_server(
    State(state): State<AppState>,
    Json(body): Json<RegisterServerBody>,
) -> Result<Json<ServerRecord>, ProxyError> {
    let transport_kind =
        TransportKind::from_wire_str(&body.transport_kind).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let request = RegisterServerRequest {
        name: body.name,
        description: body.description,
        transport_kind,
        connection_config: body.connection_config,
        health_check_address: body.health_check_address,
        tenant: body.tenant.unwrap_or_else(TenantScope::global),
    };

    let record = state.facade.register_server(request).await?;

    if body.auto_connect {
        if let Err(e) = state.facade.connect_server(&record.id).await {
            warn!("auto-connect failed for {}: {}", record.id, e);
        }
    }

    Ok(Json(record))
}

pub async fn admin_connect_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let connected = state.facade.connect_server(&id).await?;
    Ok(Json(json!({"connected": connected})))
}

pub async fn admin_disconnect_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let disconnected = state.facade.disconnect_server(&id).await?;
    Ok(Json(json!({"disconnected": disconnected})))
}

pub async fn admin_remove_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let removed = state.facade.remove_server(&id).await?;
    Ok(Json(json!({"removed": removed})))
}

pub async fn admin_discover_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let persisted = state.facade.discover_tools(&id).await?;
    Ok(Json(json!({"persisted": persisted})))
}

pub async fn admin_reconnect_unhealthy(State(state): State<AppState>) -> Json<HashMap<String, bool>> {
    Json(state.facade.reconnect_unhealthy().await)
}
