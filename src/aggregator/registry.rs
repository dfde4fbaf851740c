//! Server Registry: the authoritative store of `ServerRecord`s.
//!
//! A single `Registry` trait keeps an in-memory implementation and any
//! future store-backed implementation behaviourally identical — both must
//! satisfy the same property suite (see the crate's integration tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregator::capability::EventSink;
use crate::types::ServerId;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate server name: {0}")]
    DuplicateName(String),

    #[error("unknown server id: {0}")]
    UnknownId(String),

    #[error("invalid transport kind: {0}")]
    InvalidTransportKind(String),

    #[error("server name must be non-empty")]
    EmptyName,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// `(organisation_id, is_global)` — see the glossary entry "Tenant scope".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    pub org_id: Option<String>,
    pub is_global: bool,
}

impl TenantScope {
    pub fn global() -> Self {
        Self {
            org_id: None,
            is_global: true,
        }
    }

    pub fn tenant(org_id: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id.into()),
            is_global: false,
        }
    }

    /// `list(tenant?)` visibility rule: with a tenant id, visible = global
    /// records ∪ records owned by that tenant; without one, only global
    /// records (the defensive default).
    pub fn visible_to(&self, tenant: Option<&str>) -> bool {
        match tenant {
            Some(t) => self.is_global || self.org_id.as_deref() == Some(t),
            None => self.is_global,
        }
    }

    /// Scope-aware duplicate check: a new record's name collides with an
    /// existing one only when the existing record is global or shares the
    /// new record's tenant. Two different tenants may each register a
    /// server called the same name.
    fn collides_with(&self, other: &TenantScope) -> bool {
        other.is_global || other.org_id == self.org_id
    }
}

/// One of {subprocess-pipes, server-sent-event-stream, streamable-http}.
/// `plain-http` is accepted at the config boundary but normalises to
/// `StreamableHttp` immediately — it never appears as a distinct stored
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    SubprocessPipes,
    ServerSentEventStream,
    StreamableHttp,
}

impl TransportKind {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            TransportKind::SubprocessPipes => "subprocess-pipes",
            TransportKind::ServerSentEventStream => "server-sent-event-stream",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }

    pub fn from_wire_str(s: &str) -> Result<Self> {
        match s {
            "subprocess-pipes" | "stdio" => Ok(TransportKind::SubprocessPipes),
            "server-sent-event-stream" | "sse" => Ok(TransportKind::ServerSentEventStream),
            "streamable-http" | "plain-http" | "http" => Ok(TransportKind::StreamableHttp),
            other => Err(RegistryError::InvalidTransportKind(other.to_string())),
        }
    }
}

/// One of {disconnected, connecting, connected, degraded, error}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Error,
}

impl ServerStatus {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Connecting => "connecting",
            ServerStatus::Connected => "connected",
            ServerStatus::Degraded => "degraded",
            ServerStatus::Error => "error",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(ServerStatus::Disconnected),
            "connecting" => Some(ServerStatus::Connecting),
            "connected" => Some(ServerStatus::Connected),
            "degraded" => Some(ServerStatus::Degraded),
            "error" => Some(ServerStatus::Error),
            _ => None,
        }
    }
}

/// Durable record of one backend. `connection_config` is stored as an opaque
/// blob — the Registry never inspects transport-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub description: Option<String>,
    pub transport_kind: TransportKind,
    pub connection_config: serde_json::Value,
    pub health_check_address: Option<String>,
    pub status: ServerStatus,
    pub tool_count: usize,
    pub last_error: Option<String>,
    pub tenant: TenantScope,
    pub registered_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Input to `Registry::add`.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub description: Option<String>,
    pub transport_kind: TransportKind,
    pub connection_config: serde_json::Value,
    pub health_check_address: Option<String>,
    pub tenant: TenantScope,
}

/// Partial update accepted by `Registry::update`. `id` and `registered_at`
/// are never mutated; omitted fields (`None`) are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ServerPatch {
    pub description: Option<String>,
    pub health_check_address: Option<String>,
    pub connection_config: Option<serde_json::Value>,
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn add(&self, config: NewServer) -> Result<ServerRecord>;
    async fn get(&self, id: &str) -> Option<ServerRecord>;
    async fn get_by_name(&self, name: &str) -> Option<ServerRecord>;
    async fn list(&self, status: Option<ServerStatus>, tenant: Option<&str>) -> Vec<ServerRecord>;
    async fn update(&self, id: &str, patch: ServerPatch) -> Result<ServerRecord>;
    async fn update_status(&self, id: &str, status: ServerStatus, error: Option<String>) -> Result<bool>;
    async fn update_tool_count(&self, id: &str, n: usize) -> Result<bool>;
    async fn update_last_health_check(&self, id: &str) -> Result<bool>;
    async fn remove(&self, id: &str) -> bool;
}

/// In-memory `Registry`, the fallback used whenever no external store is
/// wired. Single-writer discipline per entry: all mutation happens through
/// these methods, none of which hold the map lock across an `.await`.
pub struct InMemoryRegistry {
    servers: DashMap<ServerId, ServerRecord>,
    events: Arc<dyn EventSink>,
}

impl InMemoryRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            servers: DashMap::new(),
            events,
        }
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn add(&self, config: NewServer) -> Result<ServerRecord> {
        if config.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        for entry in self.servers.iter() {
            if entry.value().name == config.name && config.tenant.collides_with(&entry.value().tenant) {
                return Err(RegistryError::DuplicateName(config.name));
            }
        }

        let now = Utc::now();
        let record = ServerRecord {
            id: Uuid::new_v4().to_string(),
            name: config.name,
            description: config.description,
            transport_kind: config.transport_kind,
            connection_config: config.connection_config,
            health_check_address: config.health_check_address,
            status: ServerStatus::Disconnected,
            tool_count: 0,
            last_error: None,
            tenant: config.tenant,
            registered_at: now,
            connected_at: None,
            last_health_check: None,
        };

        self.servers.insert(record.id.clone(), record.clone());
        let sink = self.events.clone();
        let event = serde_json::json!({"server_id": record.id, "status": record.status.as_wire_str()});
        sink.emit("server.registered", event).await;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Option<ServerRecord> {
        self.servers.get(id).map(|e| e.value().clone())
    }

    async fn get_by_name(&self, name: &str) -> Option<ServerRecord> {
        self.servers
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    async fn list(&self, status: Option<ServerStatus>, tenant: Option<&str>) -> Vec<ServerRecord> {
        self.servers
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.tenant.visible_to(tenant))
            .filter(|r| status.map(|s| s == r.status).unwrap_or(true))
            .collect()
    }

    async fn update(&self, id: &str, patch: ServerPatch) -> Result<ServerRecord> {
        let mut entry = self
            .servers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownId(id.to_string()))?;

        if let Some(description) = patch.description {
            entry.description = Some(description);
        }
        if let Some(addr) = patch.health_check_address {
            entry.health_check_address = Some(addr);
        }
        if let Some(cfg) = patch.connection_config {
            entry.connection_config = cfg;
        }

        Ok(entry.clone())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ServerStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut entry = match self.servers.get_mut(id) {
            Some(e) => e,
            None => return Ok(false),
        };

        let entering_connected = status == ServerStatus::Connected && entry.status != ServerStatus::Connected;
        entry.status = status;
        entry.last_error = error;
        if entering_connected {
            entry.connected_at = Some(Utc::now());
        }
        drop(entry);

        let sink = self.events.clone();
        let event = serde_json::json!({"server_id": id, "status": status.as_wire_str()});
        sink.emit("server.status_changed", event).await;
        Ok(true)
    }

    async fn update_tool_count(&self, id: &str, n: usize) -> Result<bool> {
        match self.servers.get_mut(id) {
            Some(mut e) => {
                e.tool_count = n;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_last_health_check(&self, id: &str) -> Result<bool> {
        match self.servers.get_mut(id) {
            Some(mut e) => {
                e.last_health_check = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> bool {
        self.servers.remove(id).is_some()
    }
}
