//! Server lifecycle: bind, serve until a shutdown signal, then drain.
//!
//! Draining stops accepting connections and lets in-flight responses finish
//! for up to the configured grace period. After that every request token is
//! cancelled, which kills and reaps the remaining encoders and discards their
//! temp artifacts, and the drain waits for those generation tasks to finish.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Owns the listener until shutdown is requested.
pub struct Supervisor {
    listener: TcpListener,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    grace: Duration,
}

/// A server that has stopped accepting and is finishing in-flight work.
pub struct Draining {
    /// `None` once the server task has already exited.
    server: Option<JoinHandle<io::Result<()>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    grace: Duration,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// In-flight requests outlived the grace period and were cancelled.
    pub forced: bool,
}

impl Supervisor {
    /// Bind the configured host and port.
    pub async fn bind(state: &AppState) -> ApiResult<Self> {
        let host = state.config.host.as_str();
        let port = state.config.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| ApiError::internal(format!("failed to bind {}:{}: {}", host, port, e)))?;
        Ok(Self::with_listener(listener, state))
    }

    /// Use an already bound listener.
    pub fn with_listener(listener: TcpListener, state: &AppState) -> Self {
        Self {
            listener,
            shutdown: state.shutdown.clone(),
            tasks: state.tasks.clone(),
            grace: state.config.shutdown_grace(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve `app` until `signal` resolves, then stop accepting connections.
    pub async fn run_until_shutdown<F>(self, app: Router, signal: F) -> Draining
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Listening on {}", addr);
        }

        let stop = CancellationToken::new();
        let serve = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop.clone().cancelled_owned());
        let mut server = tokio::spawn(async move { serve.await });

        let server = tokio::select! {
            _ = signal => {
                info!("Shutdown requested, no longer accepting connections");
                Some(server)
            }
            result = &mut server => {
                error!("Server stopped unexpectedly: {:?}", result);
                None
            }
        };
        stop.cancel();

        Draining {
            server,
            shutdown: self.shutdown,
            tasks: self.tasks,
            grace: self.grace,
        }
    }
}

impl Draining {
    /// Wait up to the grace period, then cancel whatever is still running and
    /// wait for its cleanup.
    pub async fn drain(mut self) -> DrainReport {
        let Some(mut server) = self.server.take() else {
            return self.cancel_in_flight(false).await;
        };

        let forced = match tokio::time::timeout(self.grace, &mut server).await {
            Ok(Ok(Ok(()))) => false,
            Ok(Ok(Err(e))) => {
                error!("Server error during shutdown: {}", e);
                false
            }
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    error!("Server task failed: {}", e);
                }
                false
            }
            Err(_) => {
                warn!(
                    grace_secs = self.grace.as_secs(),
                    "Grace period elapsed, cancelling in-flight transcodes"
                );
                true
            }
        };

        if forced {
            server.abort();
        }
        self.cancel_in_flight(forced).await
    }

    async fn cancel_in_flight(self, forced: bool) -> DrainReport {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(forced, "Drain complete");

        DrainReport { forced }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
