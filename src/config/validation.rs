//! Configuration validation logic

use crate::config::{Config, TransportConfig};
use crate::error::{Error, Result};

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("Server port must be non-zero".to_string()));
        }

        if self.server.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be non-zero".to_string(),
            ));
        }

        if self.server.tls.enabled {
            if self.server.tls.cert_path.is_none() {
                return Err(Error::Config(
                    "TLS enabled but cert_path not specified".to_string(),
                ));
            }
            if self.server.tls.key_path.is_none() {
                return Err(Error::Config(
                    "TLS enabled but key_path not specified".to_string(),
                ));
            }
        }

        if self.servers.is_empty() {
            tracing::warn!("No backend servers configured");
        }

        let mut seen_ids = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(Error::Config("Server ID cannot be empty".to_string()));
            }
            if !seen_ids.insert(server.id.clone()) {
                return Err(Error::Config(format!(
                    "Duplicate server id: {}",
                    server.id
                )));
            }
            if server.name.is_empty() {
                return Err(Error::Config(format!(
                    "Server {} has empty name",
                    server.id
                )));
            }

            match &server.transport {
                TransportConfig::Stdio { command, .. } if command.is_empty() => {
                    return Err(Error::Config(format!(
                        "Server {} has an empty stdio command",
                        server.id
                    )));
                }
                TransportConfig::Sse { url, .. }
                | TransportConfig::StreamableHttp { url, .. }
                | TransportConfig::Http { url, .. }
                    if url.is_empty() =>
                {
                    return Err(Error::Config(format!(
                        "Server {} has an empty transport url",
                        server.id
                    )));
                }
                _ => {}
            }
        }

        if self.aggregator.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "aggregator.connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.aggregator.call_timeout_secs == 0 {
            return Err(Error::Config(
                "aggregator.call_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.aggregator.health_interval_secs == 0 {
            return Err(Error::Config(
                "aggregator.health_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.aggregator.degraded_threshold == 0 {
            return Err(Error::Config(
                "aggregator.degraded_threshold must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_without_cert() {
        let mut config = Config::default();
        config.server.tls.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_server_ids_rejected() {
        let mut config = Config::default();
        let server = crate::config::McpServerConfig {
            id: "dup".to_string(),
            name: "Dup".to_string(),
            enabled: true,
            transport: TransportConfig::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: Default::default(),
            },
            health_check_address: None,
            tenant: Default::default(),
            auto_connect: true,
        };
        config.servers.push(server.clone());
        config.servers.push(server);
        assert!(config.validate().is_err());
    }
}
