/// LedgerLink Proxy Server
///
/// The HTTP service a server-mode instance runs so client-mode terminals
/// on the LAN can issue statements against its database.
///
/// Request pipeline: rate limit, origin check, preflight, liveness probe,
/// API key, then the route itself.

pub mod blocklist;
pub mod config;
pub mod connection;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod query_log;
pub mod rate_limit;
pub mod server;
pub mod service;

// Re-export key types
pub use config::ProxyConfig;
pub use connection::{ConnectionRecord, ConnectionTracker};
pub use error::{ProxyError, Result};
pub use query_log::{QueryLog, QueryLogEntry};
pub use rate_limit::RateLimiter;
pub use server::{ProxyServer, RunningServer};
pub use service::ProxyState;
