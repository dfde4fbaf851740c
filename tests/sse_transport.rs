//! Integration tests for the SSE transport: pool caching, SSE-envelope
//! parsing, and error handling against local mock endpoints.

use only1mcp::transport::sse::{SseTransport, SseTransportConfig, SseTransportPool};
use only1mcp::types::McpRequest;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A backend replying in SSE envelope format (`data: <json>\n\n`) should
/// have its payload parsed out into a normal `McpResponse`.
#[tokio::test]
async fn send_request_parses_sse_envelope_from_mock_server() {
    let mock_server = MockServer::start().await;

    let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[{\"name\":\"search\"}]}}\n\n";
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let endpoint = format!("{}/mcp", mock_server.uri());
    let config = SseTransportConfig {
        base_url: endpoint.clone(),
        request_timeout: Duration::from_secs(5),
        headers: HashMap::new(),
    };

    let transport = SseTransport::new(config).await.expect("failed to create SSE transport");
    let request = McpRequest::new("tools/list", json!({}), Some(json!(1)));
    let response = transport.send_request(&endpoint, request).await.expect("request failed");

    let result = response.result.expect("response should have a result field");
    let tools = result.get("tools").and_then(|v| v.as_array()).expect("tools array");
    assert_eq!(tools[0]["name"], "search");
}

/// Verifies that the `SseTransportPool` correctly caches transports for the
/// same endpoint+headers combination.
#[tokio::test]
async fn test_sse_pool_caching() {
    let pool = SseTransportPool::default();

    let endpoint = "https://backend.test/mcp";
    let mut headers = HashMap::new();
    headers.insert(
        "Accept".to_string(),
        "application/json, text/event-stream".to_string(),
    );

    // First request creates transport
    let transport1 = pool.get_or_create(endpoint, headers.clone()).await.unwrap();

    // Second request should return cached transport
    let transport2 = pool.get_or_create(endpoint, headers).await.unwrap();

    // Should be the same Arc instance
    assert!(
        std::sync::Arc::ptr_eq(&transport1, &transport2),
        "Transport pool should cache by endpoint+headers"
    );
}

/// Test SSE pool with different headers creates different transports
#[tokio::test]
async fn test_sse_pool_different_headers() {
    let pool = SseTransportPool::default();

    let endpoint = "https://backend.test/mcp";

    let mut headers1 = HashMap::new();
    headers1.insert("Authorization".to_string(), "Bearer token1".to_string());

    let mut headers2 = HashMap::new();
    headers2.insert("X-API-Key".to_string(), "key123".to_string());

    let transport1 = pool.get_or_create(endpoint, headers1).await.unwrap();
    let transport2 = pool.get_or_create(endpoint, headers2).await.unwrap();

    // Should be different Arc instances (different header values)
    assert!(
        !std::sync::Arc::ptr_eq(&transport1, &transport2),
        "Different headers should create different transports"
    );
}

/// `SseTransportPool::send_request` should route through `get_or_create` and
/// reach the mocked backend without a caller-managed `SseTransport`.
#[tokio::test]
async fn test_sse_pool_send_request_reaches_mock_backend() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n",
            "text/event-stream",
        ))
        .mount(&mock_server)
        .await;

    let pool = SseTransportPool::default();
    let endpoint = format!("{}/mcp", mock_server.uri());
    let request = McpRequest::new("tools/list", json!({}), Some(json!(1)));

    let response = pool.send_request(&endpoint, request).await.expect("pool request failed");
    assert!(response.result.is_some());
}

/// Connecting to a port nothing is listening on should surface as an error,
/// not a panic or a hang.
#[tokio::test]
async fn test_sse_error_handling_invalid_endpoint() {
    let config = SseTransportConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        request_timeout: Duration::from_secs(2),
        headers: HashMap::new(),
    };

    let transport = SseTransport::new(config).await.unwrap();
    let request = McpRequest::new("tools/list", json!({}), Some(json!(1)));
    let result = transport.send_request("http://127.0.0.1:1", request).await;

    assert!(result.is_err(), "Connection-refused endpoint should return error");
}

/// A mock backend that never finishes responding should trip the
/// transport's own request timeout rather than hang.
#[tokio::test]
async fn test_sse_error_handling_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let endpoint = format!("{}/mcp", mock_server.uri());
    let config = SseTransportConfig {
        base_url: endpoint.clone(),
        request_timeout: Duration::from_millis(50),
        headers: HashMap::new(),
    };

    let transport = SseTransport::new(config).await.unwrap();
    let request = McpRequest::new("tools/list", json!({}), Some(json!(1)));
    let result = transport.send_request(&endpoint, request).await;

    assert!(result.is_err(), "Request should time out against a slow backend");
}
