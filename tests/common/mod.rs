//! Common test utilities for integration tests

use only1mcp::config::{Config, McpServerConfig, ServerConfig, TenantScopeConfig, TransportConfig};
use only1mcp::proxy::server::ProxyServer;
use reqwest::Client;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;

/// Create a test configuration with sensible defaults and no backends.
pub fn test_config() -> Config {
    test_config_with_port(0)
}

/// Create a test configuration with a specific port.
pub fn test_config_with_port(port: u16) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            worker_threads: 0,
            max_connections: 100,
            tls: Default::default(),
        },
        servers: vec![],
        aggregator: Default::default(),
        observability: Default::default(),
    }
}

/// Create a test configuration with streamable-HTTP backends pointed at the
/// given URLs. Backends are registered but not auto-connected, since the
/// URLs in tests rarely point at a live MCP server.
#[allow(dead_code)]
pub fn test_config_with_backends(port: u16, backend_urls: Vec<String>) -> Config {
    let servers = backend_urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| mock_server_config(&format!("test-backend-{}", i), &url))
        .collect();

    Config {
        servers,
        ..test_config_with_port(port)
    }
}

/// Create a streamable-HTTP server config entry, disabled for auto-connect.
#[allow(dead_code)]
pub fn mock_server_config(id: &str, url: &str) -> McpServerConfig {
    McpServerConfig {
        id: id.to_string(),
        name: format!("Test Server {}", id),
        enabled: true,
        transport: TransportConfig::StreamableHttp {
            url: url.to_string(),
            headers: Default::default(),
            connect_timeout_ms: None,
            sse_read_timeout_ms: None,
        },
        health_check_address: None,
        tenant: TenantScopeConfig::default(),
        auto_connect: false,
    }
}

/// Start a test proxy server with the given config.
pub async fn start_test_server(mut config: Config) -> TestServer {
    if config.server.port == 0 {
        config.server.port = find_free_port().await;
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("invalid address");

    let server = ProxyServer::new(config).await.expect("failed to create server");

    let handle = tokio::spawn(async move {
        server.run().await.expect("server failed");
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    TestServer { addr, handle }
}

/// Find a free port for testing.
async fn find_free_port() -> u16 {
    use tokio::net::TcpListener;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind to port");
    let port = listener.local_addr().expect("failed to get local addr").port();
    drop(listener);
    port
}

/// Test server handle; aborts the server task on drop.
pub struct TestServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Create a test HTTP client.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to create client")
}

/// Assert that a JSON-RPC response is successful.
#[allow(dead_code)]
pub fn assert_jsonrpc_success(response: &Value) {
    assert_eq!(response["jsonrpc"], "2.0", "invalid JSON-RPC version");
    assert!(response.get("result").is_some(), "missing result field: {:?}", response);
    assert!(
        response.get("error").is_none(),
        "response has error: {:?}",
        response["error"]
    );
}

/// Assert that a JSON-RPC response has an error with the expected code.
#[allow(dead_code)]
pub fn assert_jsonrpc_error(response: &Value, expected_code: i32) {
    assert_eq!(response["jsonrpc"], "2.0", "invalid JSON-RPC version");
    assert!(response.get("error").is_some(), "missing error field");
    assert_eq!(
        response["error"]["code"].as_i64().unwrap(),
        expected_code as i64,
        "wrong error code"
    );
}

/// Wait for a condition with timeout, polling every 10ms.
#[allow(dead_code)]
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
