/// Prometheus metrics for the LedgerLink proxy
///
/// All metrics live in a dedicated registry and are exposed as text at the
/// authenticated `/metrics` route.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

lazy_static! {
    /// Registry holding every proxy metric
    pub static ref REGISTRY: Registry = Registry::new();

    /// HTTP responses by route and status code
    ///
    /// Labels:
    /// - route: ping, query, monitoring, metrics, preflight, other
    /// - status: numeric HTTP status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        opts!("llink_http_requests_total", "HTTP responses by route and status"),
        &["route", "status"],
        REGISTRY
    )
    .unwrap();

    /// Statement execution time in seconds, by query method
    pub static ref QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec_with_registry!(
        histogram_opts!(
            "llink_query_duration_seconds",
            "Statement execution time in seconds",
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ),
        &["method"],
        REGISTRY
    )
    .unwrap();

    /// Statements executed, by method and outcome
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        opts!("llink_queries_total", "Statements executed by method and outcome"),
        &["method", "status"],
        REGISTRY
    )
    .unwrap();

    /// Requests rejected by the per-IP rate limiter
    pub static ref RATE_LIMITED_REQUESTS: IntCounter = register_int_counter_with_registry!(
        opts!("llink_rate_limited_requests_total", "Requests rejected by the rate limiter"),
        REGISTRY
    )
    .unwrap();

    /// Statements refused by the SQL blocklist
    pub static ref BLOCKED_STATEMENTS: IntCounter = register_int_counter_with_registry!(
        opts!("llink_blocked_statements_total", "Statements refused by the SQL blocklist"),
        REGISTRY
    )
    .unwrap();

    /// Client IPs currently held in the connection table
    pub static ref TRACKED_CONNECTIONS: IntGauge = register_int_gauge_with_registry!(
        opts!("llink_tracked_connections", "Client IPs held in the connection table"),
        REGISTRY
    )
    .unwrap();
}

/// Force registration of every metric so the first scrape lists them all.
pub fn init() {
    lazy_static::initialize(&HTTP_REQUESTS_TOTAL);
    lazy_static::initialize(&QUERY_DURATION_SECONDS);
    lazy_static::initialize(&QUERIES_TOTAL);
    lazy_static::initialize(&RATE_LIMITED_REQUESTS);
    lazy_static::initialize(&BLOCKED_STATEMENTS);
    lazy_static::initialize(&TRACKED_CONNECTIONS);
}

/// Encode all metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
