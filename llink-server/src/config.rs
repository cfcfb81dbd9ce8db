/// Proxy server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use llink_core::config::DEFAULT_PORT;

/// Configuration for the proxy server
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Shared secret clients send in `X-API-Key`
    pub api_key: String,
    /// Requests allowed per IP per window
    pub rate_limit: u32,
    /// Fixed rate-limit window
    pub rate_window: Duration,
    /// Largest accepted `/query` body
    pub max_body_bytes: usize,
    /// A connection counts as active this long after its last request
    pub active_window: Duration,
    /// In-memory query log capacity
    pub log_capacity: usize,
    /// Entries returned by `/monitoring`
    pub monitoring_tail: usize,
    /// Append-only access log, if any
    pub log_file: Option<PathBuf>,
    /// Rotate the access log past this size
    pub log_rotate_bytes: u64,
    /// Lines kept when the access log rotates
    pub log_retain_lines: usize,
    /// SQL is truncated to this many characters in log entries
    pub sql_log_chars: usize,
}

impl ProxyConfig {
    pub fn new(bind_addr: SocketAddr, api_key: impl Into<String>) -> Self {
        Self {
            bind_addr,
            api_key: api_key.into(),
            rate_limit: 100,
            rate_window: Duration::from_secs(60),
            max_body_bytes: 1024 * 1024,
            active_window: Duration::from_secs(120),
            log_capacity: 500,
            monitoring_tail: 100,
            log_file: None,
            log_rotate_bytes: 5 * 1024 * 1024,
            log_retain_lines: 1000,
            sql_log_chars: 200,
        }
    }

    pub fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_window = window;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window = window;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_log_rotation(mut self, rotate_bytes: u64, retain_lines: usize) -> Self {
        self.log_rotate_bytes = rotate_bytes;
        self.log_retain_lines = retain_lines;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)), String::new())
    }
}
