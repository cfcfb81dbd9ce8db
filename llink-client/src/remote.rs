/// Client-mode database handle
///
/// Each call is one independent `POST /query`. Nothing is transactional
/// across the network: a prepared batch is N separate requests.
use async_trait::async_trait;
use llink_core::{
    DatabaseHandle, ExecResult, HandleKind, NetworkConfig, Params, PreparedStatement,
    QueryMethod, Row,
};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Request timeout for every call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Serialize)]
struct QueryRequest<'a> {
    method: QueryMethod,
    sql: &'a str,
    params: &'a [Value],
}

/// Database handle backed by a remote LedgerLink server
#[derive(Clone)]
pub struct RemoteDatabaseHandle {
    http: reqwest::Client,
    base_url: Arc<str>,
    target: Arc<str>,
    api_key: Arc<str>,
}

impl RemoteDatabaseHandle {
    /// Create a handle for `address:port` using the default timeout.
    ///
    /// # Example
    /// ```no_run
    /// # use llink_client::RemoteDatabaseHandle;
    /// # use llink_core::DatabaseHandle;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = RemoteDatabaseHandle::new("192.168.1.10", 7420, "0f3a...")?;
    /// let rows = db.query_all("SELECT * FROM products WHERE price > ?", vec![10.into()]).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(address: &str, port: u16, api_key: &str) -> Result<Self> {
        Self::with_timeout(address, port, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: &str, port: u16, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let target = format!("{}:{}", address, port);
        Ok(Self {
            http,
            base_url: Arc::from(format!("http://{}", target)),
            target: Arc::from(target),
            api_key: Arc::from(api_key),
        })
    }

    /// Build from a client-mode network config.
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| ClientError::Internal("Network config has no API key".into()))?;
        Self::new(&config.server_address, config.port, key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Unauthenticated liveness probe against `/ping`.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let payload = self.read_payload(response).await?;
        match payload.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(ClientError::Protocol(format!("Unexpected ping reply: {}", payload))),
        }
    }

    /// Fetch the server's monitoring snapshot (authenticated).
    pub async fn monitoring(&self) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/monitoring", self.base_url))
            .header(API_KEY_HEADER, &*self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.read_payload(response).await
    }

    /// Reachability plus key check, for connection setup screens.
    pub async fn check_credentials(&self) -> Result<()> {
        self.ping().await?;
        self.monitoring().await.map(|_| ())
    }

    async fn post_query(&self, method: QueryMethod, sql: &str, params: &[Value]) -> Result<Value> {
        debug!(method = method.as_str(), target = %self.target, "Forwarding query");
        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .header(API_KEY_HEADER, &*self.api_key)
            .json(&QueryRequest { method, sql, params })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.read_payload(response).await
    }

    async fn read_payload(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::InvalidApiKey);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(self.target.to_string())
                } else {
                    ClientError::Protocol(format!("Invalid response body: {}", e))
                }
            })?;

        if !status.is_success() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: error_message(&payload),
            });
        }
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: message.to_string(),
            });
        }
        Ok(payload)
    }

    fn transport_error(&self, err: reqwest::Error) -> ClientError {
        let target = self.target.to_string();
        let classified = classify_transport(&err, target);
        warn!(error = %err, "Request to server failed");
        classified
    }
}

fn error_message(payload: &Value) -> String {
    payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Unknown server error")
        .to_string()
}

/// Map a transport failure to refused / unresolved / timed out.
fn classify_transport(err: &reqwest::Error, target: String) -> ClientError {
    if err.is_timeout() {
        return ClientError::Timeout(target);
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return ClientError::ConnectionRefused(target),
                io::ErrorKind::TimedOut => return ClientError::Timeout(target),
                _ => {}
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return ClientError::HostNotFound(target);
        }
        source = cause.source();
    }

    ClientError::Connection(err.to_string())
}

fn field<'a>(payload: &'a Value, name: &str) -> Result<&'a Value> {
    payload
        .get(name)
        .ok_or_else(|| ClientError::Protocol(format!("Response missing '{}'", name)))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ClientError::Protocol(e.to_string()))
}

impl RemoteDatabaseHandle {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let payload = self.post_query(QueryMethod::All, sql, params).await?;
        decode(field(&payload, "rows")?.clone())
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let payload = self.post_query(QueryMethod::Get, sql, params).await?;
        decode(field(&payload, "row")?.clone())
    }

    async fn run_statement(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let payload = self.post_query(QueryMethod::Run, sql, params).await?;
        decode(payload)
    }
}

#[async_trait]
impl DatabaseHandle for RemoteDatabaseHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Remote
    }

    async fn query_all(&self, sql: &str, params: Params) -> llink_core::Result<Vec<Row>> {
        Ok(self.fetch_all(sql, &params).await?)
    }

    async fn query_one(&self, sql: &str, params: Params) -> llink_core::Result<Option<Row>> {
        Ok(self.fetch_one(sql, &params).await?)
    }

    async fn execute(&self, sql: &str, params: Params) -> llink_core::Result<ExecResult> {
        Ok(self.run_statement(sql, &params).await?)
    }

    async fn prepare(&self, sql: &str) -> llink_core::Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(RemotePrepared {
            handle: self.clone(),
            sql: Arc::from(sql),
            in_flight: Vec::new(),
        }))
    }
}

/// Prepared statement whose runs are independent network requests
///
/// Must be used inside a Tokio runtime: `run` spawns the request.
struct RemotePrepared {
    handle: RemoteDatabaseHandle,
    sql: Arc<str>,
    in_flight: Vec<JoinHandle<Result<ExecResult>>>,
}

#[async_trait]
impl PreparedStatement for RemotePrepared {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn run(&mut self, params: Params) {
        let handle = self.handle.clone();
        let sql = Arc::clone(&self.sql);
        self.in_flight
            .push(tokio::spawn(async move { handle.run_statement(&sql, &params).await }));
    }

    fn pending(&self) -> usize {
        self.in_flight.len()
    }

    async fn finalize(self: Box<Self>) -> llink_core::Result<()> {
        let mut first: Option<llink_core::Error> = None;
        for task in self.in_flight {
            let outcome = match task.await {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => llink_core::Error::from(e),
                Err(e) => llink_core::Error::Internal(format!("Task join error: {}", e)),
            };
            match first {
                None => first = Some(outcome),
                Some(_) => debug!(error = %outcome, "Additional batch failure"),
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn canned_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_invalid_key() {
        let port = canned_server(
            "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: 24\r\nConnection: close\r\n\r\n{\"error\":\"Unauthorized\"}",
        )
        .await;
        let db = RemoteDatabaseHandle::new("127.0.0.1", port, "wrong").unwrap();
        let err = db.fetch_all("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_server_error_body_surfaced() {
        let port = canned_server(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Type: application/json\r\nContent-Length: 34\r\nConnection: close\r\n\r\n{\"error\":\"Database query failed\"}\n",
        )
        .await;
        let db = RemoteDatabaseHandle::new("127.0.0.1", port, "k").unwrap();
        match db.run_statement("INSERT INTO t VALUES (1)", &[]).await.unwrap_err() {
            ClientError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Database query failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let db = RemoteDatabaseHandle::new("127.0.0.1", port, "k").unwrap();
        let err = db.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionRefused(_)), "got {err:?}");
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let db = RemoteDatabaseHandle::with_timeout("127.0.0.1", port, "k", Duration::from_millis(200))
            .unwrap();
        let err = db.fetch_one("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let db = RemoteDatabaseHandle::new("ledger-host.invalid", 7420, "k").unwrap();
        let err = db.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::HostNotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_from_config_requires_key() {
        let mut config = NetworkConfig::client("10.1.1.1", 7420, "abc");
        let db = RemoteDatabaseHandle::from_config(&config).unwrap();
        assert_eq!(db.base_url(), "http://10.1.1.1:7420");
        assert_eq!(db.kind(), HandleKind::Remote);

        config.api_key = None;
        assert!(RemoteDatabaseHandle::from_config(&config).is_err());
    }
}
