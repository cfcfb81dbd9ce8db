/// HTTP routes and the request gatekeeper
///
/// Every request passes the gatekeeper middleware first. It applies, in
/// order: per-IP rate limit, origin policy, preflight short-circuit,
/// liveness bypass, and the API key check. Security headers are added to
/// every response it lets out, including rejections.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::StreamExt;
use llink_core::{value::params_from_json, DatabaseHandle, QueryMethod};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::blocklist::is_blocked;
use crate::config::ProxyConfig;
use crate::connection::ConnectionTracker;
use crate::cors::is_allowed_origin;
use crate::error::{ProxyError, Result};
use crate::metrics::{
    encode_metrics, BLOCKED_STATEMENTS, HTTP_REQUESTS_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS,
};
use crate::query_log::{QueryLog, QueryLogEntry};
use crate::rate_limit::RateLimiter;

pub const API_KEY_HEADER: &str = "x-api-key";

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, X-API-Key";

/// State shared by every request of one server instance
pub struct ProxyState {
    pub config: ProxyConfig,
    pub db: Arc<dyn DatabaseHandle>,
    pub limiter: RateLimiter,
    pub connections: ConnectionTracker,
    pub log: QueryLog,
    pub started_at: Instant,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, db: Arc<dyn DatabaseHandle>) -> Self {
        let mut log = QueryLog::new(config.log_capacity);
        if let Some(path) = &config.log_file {
            log = log.with_file(path, config.log_rotate_bytes, config.log_retain_lines);
        }

        Self {
            limiter: RateLimiter::new(config.rate_limit, config.rate_window),
            connections: ConnectionTracker::new(config.active_window),
            log,
            db,
            config,
            started_at: Instant::now(),
        }
    }

    fn key_matches(&self, presented: Option<&HeaderValue>) -> bool {
        let expected = self.config.api_key.as_bytes();
        !expected.is_empty() && presented.map(|v| v.as_bytes()) == Some(expected)
    }
}

/// Caller IP, resolved once by the gatekeeper.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub IpAddr);

/// Build the proxy router for `state`
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/query", post(query))
        .route("/monitoring", get(monitoring))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), gatekeeper))
        .with_state(state)
}

fn route_label(path: &str) -> &'static str {
    match path {
        "/ping" => "ping",
        "/query" => "query",
        "/monitoring" => "monitoring",
        "/metrics" => "metrics",
        _ => "other",
    }
}

async fn gatekeeper(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = peer.ip();
    let route = if req.method() == Method::OPTIONS {
        "preflight"
    } else {
        route_label(req.uri().path())
    };

    if !state.limiter.check(ip) {
        return finish(ProxyError::RateLimited.into_response(), None, route);
    }

    let origin = match req.headers().get(header::ORIGIN) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(text) if is_allowed_origin(text) => Some(value.clone()),
            _ => {
                warn!(ip = %ip, origin = ?value, "Rejected request from disallowed origin");
                return finish(ProxyError::OriginNotAllowed.into_response(), None, route);
            }
        },
    };

    if req.method() == Method::OPTIONS {
        return finish(StatusCode::NO_CONTENT.into_response(), origin, route);
    }

    if req.uri().path() != "/ping" && !state.key_matches(req.headers().get(API_KEY_HEADER)) {
        warn!(ip = %ip, path = %req.uri().path(), "Rejected request with missing or invalid API key");
        return finish(ProxyError::Unauthorized.into_response(), origin, route);
    }

    req.extensions_mut().insert(ClientAddr(ip));
    let response = next.run(req).await;
    finish(response, origin, route)
}

fn finish(mut response: Response, origin: Option<HeaderValue>, route: &str) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    if let Some(origin) = origin {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[route, response.status().as_str()])
        .inc();
    response
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ProxyError {
    ProxyError::NotFound
}

/// Read at most `limit` bytes of body, failing as soon as it runs over.
async fn read_limited(body: Body, limit: usize) -> Result<Vec<u8>> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::BadRequest(format!("Failed to read body: {}", e)))?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

async fn query(
    State(state): State<Arc<ProxyState>>,
    Extension(ClientAddr(ip)): Extension<ClientAddr>,
    body: Body,
) -> Result<Json<Value>> {
    let bytes = read_limited(body, state.config.max_body_bytes).await?;
    let request: Value = serde_json::from_slice(&bytes)
        .map_err(|_| ProxyError::BadRequest("Invalid JSON body".to_string()))?;

    let method = request
        .get("method")
        .and_then(Value::as_str)
        .and_then(QueryMethod::parse)
        .ok_or_else(|| ProxyError::BadRequest("Invalid method".to_string()))?;

    let sql = match request.get("sql").and_then(Value::as_str) {
        Some(sql) if !sql.trim().is_empty() => sql,
        _ => return Err(ProxyError::BadRequest("SQL must be a non-empty string".to_string())),
    };

    if is_blocked(sql) {
        BLOCKED_STATEMENTS.inc();
        warn!(ip = %ip, "Blocked statement from network client");
        return Err(ProxyError::Blocked);
    }

    let params = params_from_json(request.get("params").cloned());
    state.connections.record(ip);

    let start = Instant::now();
    let result = state.db.run_method(method, sql, params).await;
    let elapsed = start.elapsed();

    QUERY_DURATION_SECONDS
        .with_label_values(&[method.as_str()])
        .observe(elapsed.as_secs_f64());

    let cause = result.as_ref().err().map(|e| e.to_string());
    state
        .log
        .record(QueryLogEntry::new(
            ip.to_string(),
            method.as_str(),
            sql,
            state.config.sql_log_chars,
            elapsed,
            cause.as_deref(),
        ))
        .await;

    match result {
        Ok(output) => {
            QUERIES_TOTAL.with_label_values(&[method.as_str(), "success"]).inc();
            debug!(ip = %ip, method = method.as_str(), duration_ms = elapsed.as_millis() as u64, "Query completed");
            Ok(Json(output.to_json()))
        }
        Err(e) => {
            QUERIES_TOTAL.with_label_values(&[method.as_str(), "error"]).inc();
            error!(ip = %ip, method = method.as_str(), error = %e, "Query failed");
            Err(ProxyError::Engine)
        }
    }
}

async fn monitoring(State(state): State<Arc<ProxyState>>) -> Json<Value> {
    let now = Instant::now();
    let counts = state.log.counts();
    Json(json!({
        "connections": state.connections.snapshot_at(now),
        "recentQueries": state.log.recent(state.config.monitoring_tail),
        "stats": {
            "totalConnections": state.connections.total(),
            "activeConnections": state.connections.active_count_at(now),
            "totalQueries": counts.total,
            "failedQueries": counts.failed,
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
        }
    }))
}

async fn metrics() -> Result<Response> {
    let text = encode_metrics().map_err(|e| ProxyError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}
