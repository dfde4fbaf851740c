//! Error types for Only1MCP

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Ambient, crate-wide error type: configuration loading, the HTTP server's
/// own bind/serve failures, and wrapped I/O/serialization errors. The
/// per-subsystem taxonomy from spec §7 (`connection_failed`,
/// `server_unavailable`, `tool_execution_timeout`, `discovery_error`, ...)
/// lives on each subsystem's own error enum (`RegistryError`,
/// `SessionError`, `AggregatorError`, `RoutingError`, `FacadeError`) and is
/// bridged into [`ProxyError`] at the HTTP boundary rather than funnelled
/// through this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 400,
            _ => 500,
        }
    }
}

/// Proxy-specific errors for HTTP handlers
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No backend available: {0}")]
    NoBackendAvailable(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(Error),
}

impl ProxyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::BackendError(_) | ProxyError::Timeout(_))
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ProxyError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ProxyError::NoBackendAvailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ProxyError::BackendError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ProxyError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            ProxyError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ProxyError::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ProxyError::Core(err) => (
                StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": status.as_u16(),
                "message": error_message,
            },
            "id": null
        }));

        (status, body).into_response()
    }
}

impl From<crate::aggregator::router::RoutingError> for ProxyError {
    fn from(err: crate::aggregator::router::RoutingError) -> Self {
        use crate::aggregator::router::RoutingError as R;
        match err {
            R::ServerNotFound(msg) => ProxyError::NoBackendAvailable(msg),
            R::ToolNotFound(msg) => ProxyError::NoBackendAvailable(msg),
            R::ServerUnavailable(msg) => ProxyError::NoBackendAvailable(msg),
            R::Timeout(msg) => ProxyError::Timeout(msg),
            R::ExecutionFailed(msg) => ProxyError::BackendError(msg),
            R::DisconnectedDuringExecution(msg) => ProxyError::BackendError(msg),
        }
    }
}

impl From<Error> for ProxyError {
    fn from(err: Error) -> Self {
        ProxyError::Core(err)
    }
}

impl From<crate::aggregator::facade::FacadeError> for ProxyError {
    fn from(err: crate::aggregator::facade::FacadeError) -> Self {
        use crate::aggregator::facade::FacadeError as F;
        match err {
            F::ServerNotFound(msg) => ProxyError::NoBackendAvailable(msg),
            F::Registry(e) => ProxyError::Internal(e.to_string()),
            F::Routing(e) => e.into(),
        }
    }
}
