//! Axum HTTP surface: JSON-RPC dispatch onto the aggregator `Facade`, plus
//! admin routes for server lifecycle management.

use crate::{config::Config, error::Result};

pub mod handler;
pub mod server;

pub use server::ProxyServer;

/// Initialize the proxy server with configuration
pub async fn init(config: Config) -> Result<ProxyServer> {
    ProxyServer::new(config).await
}
