//! Configuration module for Only1MCP
//!
//! Handles loading, validation, and hot-reloading of configuration files.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod loader;
pub mod validation;

// A second, independent file-watcher implementation (`config::watcher`,
// `notify` direct) duplicated what `loader::ConfigLoader` already does with
// `notify-debouncer-full` + `arc-swap`; dropped in favour of the loader.

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

/// One entry in `servers:` — a backend to register with the aggregator at
/// startup. Mirrors the shape the Facade's `register_server` accepts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub transport: TransportConfig,
    #[serde(default)]
    pub health_check_address: Option<String>,
    #[serde(default)]
    pub tenant: TenantScopeConfig,
    /// Connect immediately on startup rather than waiting for an explicit
    /// `connect_server` call.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// `(organisation_id, is_global)` — see spec §3, glossary "Tenant scope".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantScopeConfig {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_global: bool,
}

impl Default for TenantScopeConfig {
    fn default() -> Self {
        Self {
            org_id: None,
            is_global: true,
        }
    }
}

/// Transport-specific connection config. `type: http` is accepted as an
/// alias for `streamable_http` per spec §3 ("plain-http is an alias for
/// streamable-http").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        connect_timeout_ms: Option<u64>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        connect_timeout_ms: Option<u64>,
        #[serde(default)]
        sse_read_timeout_ms: Option<u64>,
    },
    #[serde(alias = "plain_http")]
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        connect_timeout_ms: Option<u64>,
        #[serde(default)]
        sse_read_timeout_ms: Option<u64>,
    },
}

/// Ambient tuning knobs for the aggregator core (§5, §9 of the spec).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            health_interval_secs: default_health_interval_secs(),
            degraded_threshold: default_degraded_threshold(),
            embedding_dimension: default_embedding_dimension(),
            default_search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> usize {
    10000
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_health_interval_secs() -> u64 {
    30
}
fn default_degraded_threshold() -> u32 {
    3
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_search_limit() -> usize {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            worker_threads: 0,
            max_connections: default_max_connections(),
            tls: TlsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("yaml");

        match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e))),
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e))),
            _ => Err(Error::Config(format!(
                "Unsupported config format: {}",
                extension
            ))),
        }
    }

    /// Discover and load configuration from standard locations
    pub fn discover_and_load() -> Result<Self> {
        Self::discover_and_load_with_path(None).map(|(config, _)| config)
    }

    /// Same as [`Config::discover_and_load`] but also returns the path the
    /// configuration was loaded from (or `None` if the built-in default was
    /// used because nothing was found).
    pub fn discover_and_load_with_path(
        explicit: Option<PathBuf>,
    ) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(&path)?, Some(path)));
        }

        let mut search_paths = vec![
            PathBuf::from("only1mcp.yaml"),
            PathBuf::from("only1mcp.toml"),
        ];

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".only1mcp/config.yaml"));
        }

        search_paths.push(PathBuf::from("/etc/only1mcp/config.yaml"));

        for path in search_paths {
            if path.exists() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Validate configuration file
    pub fn validate_file(path: &Path) -> Result<()> {
        let config = Self::from_file(path)?;
        config.validate()
    }
}
