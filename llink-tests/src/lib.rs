/// Test utilities and helpers for LedgerLink testing
///
/// `TestServer` runs a real proxy on a loopback port in front of a
/// temporary database, so tests can drive the same data through both the
/// local and the remote handle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use llink_client::RemoteDatabaseHandle;
use llink_core::{DatabaseHandle, LocalDatabaseHandle};
use llink_server::{ProxyConfig, ProxyServer, ProxyState, RunningServer};
use tempfile::TempDir;

pub const TEST_API_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Schema shared by the integration tests
pub const SCHEMA: &str = "
    CREATE TABLE products (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        price REAL,
        stock INTEGER,
        image BLOB
    );
    INSERT INTO products (name, price, stock, image) VALUES
        ('tea', 2.5, 10, x'DEADBEEF'),
        ('rice', 40.0, NULL, NULL),
        ('salt', 1.0, 3, x'');
";

/// A proxy in front of a seeded temporary database
pub struct TestServer {
    pub local: LocalDatabaseHandle,
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    state: Arc<ProxyState>,
    running: Option<RunningServer>,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Start with default proxy settings
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    /// Start, letting `tune` adjust the proxy config
    pub async fn start_with(tune: impl FnOnce(ProxyConfig) -> ProxyConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("ledger.db");
        let local = LocalDatabaseHandle::open(&db_path).expect("Failed to open database");
        local.execute_batch(SCHEMA).await.expect("Failed to seed schema");

        let config = tune(ProxyConfig::new(
            "127.0.0.1:0".parse().expect("valid addr"),
            TEST_API_KEY,
        ));
        let server = ProxyServer::new(config, Arc::new(local.clone()));
        let state = server.state().clone();
        let running = server.spawn().await.expect("Failed to start proxy");

        Self {
            local,
            addr: running.local_addr(),
            db_path,
            state,
            running: Some(running),
            _temp_dir: temp_dir,
        }
    }

    /// Remote handle using the correct key
    pub fn remote(&self) -> RemoteDatabaseHandle {
        self.remote_with_key(TEST_API_KEY)
    }

    pub fn remote_with_key(&self, key: &str) -> RemoteDatabaseHandle {
        RemoteDatabaseHandle::with_timeout("127.0.0.1", self.addr.port(), key, Duration::from_secs(5))
            .expect("Failed to build client")
    }

    /// Server-side state (connection table, query log)
    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    /// Row count of `products`, read directly from the local handle
    pub async fn product_count(&self) -> i64 {
        let row = self
            .local
            .query_one("SELECT COUNT(*) AS n FROM products", vec![])
            .await
            .expect("count query")
            .expect("count row");
        row["n"].as_i64().expect("integer count")
    }

    pub async fn shutdown(mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown().await.expect("Proxy shutdown failed");
        }
    }
}
