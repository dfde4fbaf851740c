//! Prometheus metrics for the subsystems this crate actually implements:
//! request volume/latency, backend health, tool discovery, circuit breaker
//! state, and health-check outcomes. Context-optimization families
//! (response cache, request batching, API cost) have no counterpart here and
//! were dropped.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, HistogramVec, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

lazy_static! {
    // Request metrics
    pub static ref MCP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "only1mcp_mcp_requests_total",
            "Total number of MCP requests processed"
        ),
        &["server_id", "method", "status"]
    ).unwrap();

    pub static ref MCP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "only1mcp_mcp_request_duration_seconds",
            "MCP request duration in seconds",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        ),
        &["server_id", "method"]
    ).unwrap();

    // Backend server health
    pub static ref BACKEND_HEALTH_STATUS: GaugeVec = register_gauge_vec!(
        opts!(
            "only1mcp_backend_health_status",
            "Health status of backend servers (0=down, 1=up)"
        ),
        &["server_id", "transport_type"]
    ).unwrap();

    pub static ref BACKEND_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "only1mcp_backend_latency_seconds",
            "Backend server response latency",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ),
        &["server_id", "endpoint"]
    ).unwrap();

    // Tool discovery
    pub static ref DISCOVERY_TOOLS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "only1mcp_discovery_tools_total",
            "Total number of tools discovered from backends"
        ),
        &["server_id", "outcome"]  // outcome: persisted, skipped
    ).unwrap();

    pub static ref DISCOVERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "only1mcp_discovery_duration_seconds",
            "Time to discover and persist one server's tools",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
        ),
        &["server_id"]
    ).unwrap();

    // Circuit breaker metrics
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        opts!(
            "only1mcp_circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half-open)"
        ),
        &["server_id"]
    ).unwrap();

    pub static ref CIRCUIT_BREAKER_FAILURES: CounterVec = register_counter_vec!(
        opts!(
            "only1mcp_circuit_breaker_failures_total",
            "Total circuit breaker failures"
        ),
        &["server_id"]
    ).unwrap();

    // Configuration hot-reload metrics
    pub static ref CONFIG_RELOAD_TOTAL: prometheus::IntCounter = prometheus::register_int_counter!(
        "only1mcp_config_reload_total",
        "Total number of successful configuration reloads"
    ).unwrap();

    pub static ref CONFIG_RELOAD_ERRORS: prometheus::IntCounter = prometheus::register_int_counter!(
        "only1mcp_config_reload_errors_total",
        "Total number of configuration reload errors"
    ).unwrap();

    // Health check metrics
    pub static ref HEALTH_CHECK_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "only1mcp_health_check_total",
            "Total number of health checks performed"
        ),
        &["server_id", "result"]  // result: success, failure
    ).unwrap();

    pub static ref HEALTH_CHECK_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "only1mcp_health_check_duration_seconds",
            "Health check duration in seconds",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ),
        &["server_id"]
    ).unwrap();

    pub static ref SERVER_HEALTH_STATUS: GaugeVec = register_gauge_vec!(
        opts!(
            "only1mcp_server_health_status",
            "Server health status (0=unhealthy, 1=healthy)"
        ),
        &["server_id"]
    ).unwrap();

    // Registry for all metrics
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry.register(Box::new(MCP_REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(MCP_REQUEST_DURATION_SECONDS.clone())).unwrap();
        registry.register(Box::new(BACKEND_HEALTH_STATUS.clone())).unwrap();
        registry.register(Box::new(BACKEND_LATENCY_SECONDS.clone())).unwrap();
        registry.register(Box::new(DISCOVERY_TOOLS_TOTAL.clone())).unwrap();
        registry.register(Box::new(DISCOVERY_DURATION_SECONDS.clone())).unwrap();
        registry.register(Box::new(CIRCUIT_BREAKER_STATE.clone())).unwrap();
        registry.register(Box::new(CIRCUIT_BREAKER_FAILURES.clone())).unwrap();
        registry.register(Box::new(CONFIG_RELOAD_TOTAL.clone())).unwrap();
        registry.register(Box::new(CONFIG_RELOAD_ERRORS.clone())).unwrap();
        registry.register(Box::new(HEALTH_CHECK_TOTAL.clone())).unwrap();
        registry.register(Box::new(HEALTH_CHECK_DURATION_SECONDS.clone())).unwrap();
        registry.register(Box::new(SERVER_HEALTH_STATUS.clone())).unwrap();
        registry
    };
}

/// Record metrics for an MCP request
pub fn record_mcp_request(server_id: &str, method: &str, status: &str, duration: Duration) {
    MCP_REQUESTS_TOTAL.with_label_values(&[server_id, method, status]).inc();

    MCP_REQUEST_DURATION_SECONDS
        .with_label_values(&[server_id, method])
        .observe(duration.as_secs_f64());
}

/// Update backend health status
pub fn update_backend_health(server_id: &str, transport_type: &str, is_healthy: bool) {
    BACKEND_HEALTH_STATUS
        .with_label_values(&[server_id, transport_type])
        .set(if is_healthy { 1.0 } else { 0.0 });
}

/// Record backend latency
pub fn record_backend_latency(server_id: &str, endpoint: &str, duration: Duration) {
    BACKEND_LATENCY_SECONDS
        .with_label_values(&[server_id, endpoint])
        .observe(duration.as_secs_f64());
}

/// Record a discovery pass outcome for one server
pub fn record_discovery(server_id: &str, persisted: usize, skipped: usize, duration: Duration) {
    DISCOVERY_TOOLS_TOTAL.with_label_values(&[server_id, "persisted"]).inc_by(persisted as f64);
    DISCOVERY_TOOLS_TOTAL.with_label_values(&[server_id, "skipped"]).inc_by(skipped as f64);
    DISCOVERY_DURATION_SECONDS.with_label_values(&[server_id]).observe(duration.as_secs_f64());
}

/// Update circuit breaker state
pub fn update_circuit_breaker_state(server_id: &str, state: CircuitBreakerState) {
    let state_value = match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::Open => 1.0,
        CircuitBreakerState::HalfOpen => 2.0,
    };
    CIRCUIT_BREAKER_STATE.with_label_values(&[server_id]).set(state_value);
}

/// Record circuit breaker failure
pub fn record_circuit_breaker_failure(server_id: &str) {
    CIRCUIT_BREAKER_FAILURES.with_label_values(&[server_id]).inc();
}

/// Record a health-check outcome
pub fn record_health_check(server_id: &str, healthy: bool, duration: Duration) {
    HEALTH_CHECK_TOTAL
        .with_label_values(&[server_id, if healthy { "success" } else { "failure" }])
        .inc();
    HEALTH_CHECK_DURATION_SECONDS.with_label_values(&[server_id]).observe(duration.as_secs_f64());
    SERVER_HEALTH_STATUS.with_label_values(&[server_id]).set(if healthy { 1.0 } else { 0.0 });
}

/// Circuit breaker state enum
#[derive(Debug, Clone, Copy)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Metrics exporter for Prometheus scraping
pub struct MetricsExporter {
    registry: Arc<Registry>,
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsExporter {
    /// Create new metrics exporter
    pub fn new() -> Self {
        Self {
            registry: Arc::new(REGISTRY.clone()),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<Vec<u8>, PrometheusError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(buffer)
    }
}

/// Prometheus error wrapper
#[derive(Debug, thiserror::Error)]
pub enum PrometheusError {
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

/// HTTP handler for /metrics endpoint
pub async fn metrics_handler(
    State(state): State<crate::proxy::server::AppState>,
) -> impl IntoResponse {
    match state.metrics.exporter.export() {
        Ok(metrics) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            metrics,
        ),
        Err(e) => {
            tracing::error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                b"Failed to export metrics".to_vec(),
            )
        },
    }
}

/// Convenient metrics wrapper for application state
#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<MetricsExporter>,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self {
            exporter: Arc::new(MetricsExporter::new()),
        }
    }

    /// Record MCP request
    pub fn record_request(&self, server_id: &str, method: &str, status: &str, duration: Duration) {
        record_mcp_request(server_id, method, status, duration);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
