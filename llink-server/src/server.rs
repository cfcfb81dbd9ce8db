/// Proxy server lifecycle
///
/// Binds the listener, serves the router with per-connection peer
/// addresses, and stops gracefully when asked.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use llink_core::DatabaseHandle;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::service::{router, ProxyState};

/// One proxy instance; owns its rate-limit, connection and log state
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, db: Arc<dyn DatabaseHandle>) -> Self {
        metrics::init();
        Self {
            state: Arc::new(ProxyState::new(config, db)),
        }
    }

    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Proxy server listening");

        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!(addr = %addr, "Proxy server stopped");
        Ok(())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Bind and serve on a background task
    pub async fn spawn(self) -> Result<RunningServer> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let task = tokio::spawn(self.serve_on(listener, async {
            let _ = rx.await;
        }));

        Ok(RunningServer {
            local_addr,
            shutdown: Some(tx),
            task,
        })
    }
}

/// Handle to a proxy running on a background task
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for in-flight requests to drain
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Proxy server task failed");
                Err(ProxyError::Internal(e.to_string()))
            }
        }
    }
}
