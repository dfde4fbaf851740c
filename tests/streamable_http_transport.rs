//! Integration tests for the Streamable HTTP transport: session lifecycle,
//! pool reuse, and timeout handling against local mock endpoints.

use only1mcp::transport::streamable_http::{StreamableHttpConfig, StreamableHttpTransport};
use only1mcp::types::McpRequest;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test helper to create a basic transport config
fn create_test_config(url: impl Into<String>) -> StreamableHttpConfig {
    let mut headers = HashMap::new();
    headers.insert(
        "Accept".into(),
        "application/json, text/event-stream".into(),
    );
    headers.insert("Content-Type".into(), "application/json".into());

    StreamableHttpConfig {
        url: url.into(),
        headers,
        timeout_ms: 30000,
    }
}

/// `send_request` auto-initializes when there is no session yet, then
/// stores and reuses the `mcp-session-id` the mock backend hands back.
#[tokio::test]
async fn test_streamable_http_session_management() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).insert_header("mcp-session-id", "sess-123").set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": []}
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(format!("{}/mcp", mock_server.uri()));
    let transport = StreamableHttpTransport::new(config);

    // Initially, no session ID
    assert!(transport.get_session_id().await.is_none());

    // Send tools/list request (transport auto-sends initialize first since
    // no session exists yet).
    let tools_request = McpRequest::new("tools/list", json!({}), Some(json!(1)));
    let tools_response = transport.send_request(tools_request).await;
    assert!(
        tools_response.is_ok(),
        "Tools list should succeed: {:?}",
        tools_response.err()
    );

    // Session ID should be stored after the round trip.
    let session_id = transport.get_session_id().await;
    assert_eq!(session_id.as_deref(), Some("sess-123"));

    // A second request should reuse the same session ID.
    let second_request = McpRequest::new("tools/list", json!({}), Some(json!(2)));
    transport.send_request(second_request).await.expect("second request should succeed");
    assert_eq!(transport.get_session_id().await.as_deref(), Some("sess-123"));
}

#[tokio::test]
async fn test_streamable_http_session_clear() {
    let config = create_test_config("http://example.com/mcp");
    let transport = StreamableHttpTransport::new(config);

    // Initially no session
    assert!(transport.get_session_id().await.is_none());

    // Clear should be safe even when no session exists
    transport.clear_session().await;
    assert!(transport.get_session_id().await.is_none());
}

#[tokio::test]
async fn test_streamable_http_pool_reuse() {
    use only1mcp::transport::streamable_http::StreamableHttpTransportPool;

    let pool = StreamableHttpTransportPool::new();
    assert_eq!(pool.size(), 0);

    // Create first transport
    let config1 = create_test_config("http://test1.example.com/mcp");
    let t1 = pool.get_or_create(config1.clone());
    assert_eq!(pool.size(), 1);

    // Same URL should reuse transport
    let t2 = pool.get_or_create(config1);
    assert_eq!(pool.size(), 1);
    assert!(std::sync::Arc::ptr_eq(&t1, &t2));

    // Different URL creates new transport
    let config2 = create_test_config("http://test2.example.com/mcp");
    let t3 = pool.get_or_create(config2);
    assert_eq!(pool.size(), 2);
    assert!(!std::sync::Arc::ptr_eq(&t1, &t3));
}

/// A mock backend that never finishes responding should trip the
/// transport's own timeout rather than hang.
#[tokio::test]
async fn test_streamable_http_timeout_handling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&mock_server)
        .await;

    let mut headers = HashMap::new();
    headers.insert(
        "Accept".into(),
        "application/json, text/event-stream".into(),
    );

    let config = StreamableHttpConfig {
        url: format!("{}/mcp", mock_server.uri()),
        headers,
        timeout_ms: 1, // 1ms timeout against a backend that delays 200ms
    };

    let transport = StreamableHttpTransport::new(config);

    let request = McpRequest::new(
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "timeout-test", "version": "1.0.0"}
        }),
        Some(json!(0)),
    );

    let response = transport.send_request(request).await;
    assert!(response.is_err(), "Should fail with a 1ms timeout against a slow backend");
}

#[test]
fn test_streamable_http_config_defaults() {
    let config = StreamableHttpConfig {
        url: "http://test.com/mcp".to_string(),
        headers: HashMap::new(),
        timeout_ms: 30000,
    };

    assert_eq!(config.timeout_ms, 30000);
    assert!(config.headers.is_empty());
}
