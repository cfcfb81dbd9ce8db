/// Deployment facade.
///
/// The deployment mode is read once at startup and decides which
/// [`DatabaseHandle`] the rest of the application talks to:
///
/// - **server**: decrypt the at-rest copy, open the local database, and
///   expose it to the LAN through the proxy.
/// - **client**: forward every statement to the configured server.
/// - **unset**: a plain local database, no proxy and no encryption.
///
/// Callers only ever see [`Deployment::handle`]; nothing downstream
/// branches on the mode.

use std::net::SocketAddr;
use std::sync::Arc;

use llink_client::{ClientError, RemoteDatabaseHandle};
use llink_core::{
    AtRestEncryptionManager, DatabaseHandle, DeploymentMode, LocalDatabaseHandle, NetworkConfig,
    Paths, ShutdownOutcome, StartupOutcome,
};
use llink_server::{ProxyConfig, ProxyError, ProxyServer, RunningServer};
use thiserror::Error;
use tracing::{info, warn};

pub use llink_core::{ExecResult, Params, Row};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] llink_core::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A started application data layer
pub struct Deployment {
    mode: DeploymentMode,
    handle: Arc<dyn DatabaseHandle>,
    local: Option<LocalDatabaseHandle>,
    at_rest: Option<AtRestEncryptionManager>,
    proxy: Option<RunningServer>,
    startup: Option<StartupOutcome>,
}

impl Deployment {
    /// Start with the default proxy settings for `config.port`
    pub async fn start(paths: &Paths, config: NetworkConfig) -> Result<Self> {
        Self::start_with(paths, config, |proxy| proxy).await
    }

    /// Start, letting `tune` adjust the proxy config in server mode
    pub async fn start_with<F>(paths: &Paths, config: NetworkConfig, tune: F) -> Result<Self>
    where
        F: FnOnce(ProxyConfig) -> ProxyConfig,
    {
        config.validate()?;

        match config.mode {
            DeploymentMode::Client => {
                let remote = RemoteDatabaseHandle::from_config(&config)?;
                info!(server = %remote.base_url(), "Client mode: statements go to the server");
                Ok(Self {
                    mode: config.mode,
                    handle: Arc::new(remote),
                    local: None,
                    at_rest: None,
                    proxy: None,
                    startup: None,
                })
            }
            DeploymentMode::Unset => {
                let local = LocalDatabaseHandle::open(paths.database())?;
                info!(path = %paths.database().display(), "Standalone mode: local database");
                Ok(Self {
                    mode: config.mode,
                    handle: Arc::new(local.clone()),
                    local: Some(local),
                    at_rest: None,
                    proxy: None,
                    startup: None,
                })
            }
            DeploymentMode::Server => Self::start_server(paths, config, tune).await,
        }
    }

    async fn start_server<F>(paths: &Paths, mut config: NetworkConfig, tune: F) -> Result<Self>
    where
        F: FnOnce(ProxyConfig) -> ProxyConfig,
    {
        let at_rest = AtRestEncryptionManager::from_paths(paths);
        let (at_rest, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = at_rest.startup();
            (at_rest, outcome)
        })
        .await?;

        // The engine opens only after decryption has finished
        let local = match LocalDatabaseHandle::open(paths.database()) {
            Ok(local) => local,
            Err(e) => {
                abandon_start(None, at_rest, &e).await;
                return Err(e.into());
            }
        };

        let api_key = match config.ensure_api_key(&paths.network_config()) {
            Ok(key) => key.to_string(),
            Err(e) => {
                abandon_start(Some(local), at_rest, &e).await;
                return Err(e.into());
            }
        };

        let proxy_config = tune(
            ProxyConfig::new(SocketAddr::from(([0, 0, 0, 0], config.port)), api_key)
                .with_log_file(paths.query_log()),
        );

        let server = ProxyServer::new(proxy_config, Arc::new(local.clone()));
        let proxy = match server.spawn().await {
            Ok(proxy) => proxy,
            Err(e) => {
                abandon_start(Some(local), at_rest, &e).await;
                return Err(e.into());
            }
        };
        info!(addr = %proxy.local_addr(), "Server mode: proxy accepting LAN clients");

        Ok(Self {
            mode: config.mode,
            handle: Arc::new(local.clone()),
            local: Some(local),
            at_rest: Some(at_rest),
            proxy: Some(proxy),
            startup: Some(outcome),
        })
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// The handle every caller uses, whatever the mode
    pub fn handle(&self) -> Arc<dyn DatabaseHandle> {
        self.handle.clone()
    }

    /// Address the proxy is bound to (server mode only)
    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        self.proxy.as_ref().map(RunningServer::local_addr)
    }

    pub fn startup_outcome(&self) -> Option<StartupOutcome> {
        self.startup
    }

    /// Stop the proxy, close the engine, then encrypt the database.
    ///
    /// Each step is best-effort; failures are logged and the next step
    /// still runs. Returns the at-rest outcome in server mode.
    pub async fn shutdown(mut self) -> Result<Option<ShutdownOutcome>> {
        if let Some(proxy) = self.proxy.take() {
            if let Err(e) = proxy.shutdown().await {
                warn!(error = %e, "Proxy did not stop cleanly");
            }
        }

        if let Some(local) = self.local.take() {
            close_local(local).await;
        }

        let Some(at_rest) = self.at_rest.take() else {
            return Ok(None);
        };
        let outcome = tokio::task::spawn_blocking(move || at_rest.shutdown()).await?;
        Ok(Some(outcome))
    }
}

/// Close the engine on the blocking pool; failures are logged.
async fn close_local(local: LocalDatabaseHandle) {
    match tokio::task::spawn_blocking(move || local.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to close database"),
        Err(e) => warn!(error = %e, "Database close task failed"),
    }
}

/// Undo a server start that failed after decryption, so the plaintext
/// never outlives the failed attempt.
async fn abandon_start(
    local: Option<LocalDatabaseHandle>,
    at_rest: AtRestEncryptionManager,
    cause: &dyn std::fmt::Display,
) {
    warn!(error = %cause, "Server mode failed to start; re-encrypting database");
    if let Some(local) = local {
        close_local(local).await;
    }
    if let Err(e) = tokio::task::spawn_blocking(move || at_rest.shutdown()).await {
        warn!(error = %e, "At-rest shutdown task failed");
    }
}
