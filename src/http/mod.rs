//! HTTP server for the public snapshot API.
//!
//! Routes live in [`routes`]; this module binds the listener, runs axum with
//! graceful shutdown and closes the database pool once the server stops.

pub mod routes;

pub use routes::{ApiError, AppState, router};

use crate::db::PoolProvider;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// How long in-flight requests get after the first shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpServer {
    provider: PoolProvider,
    host: String,
    port: u16,
}

impl HttpServer {
    pub fn new(provider: PoolProvider, host: impl Into<String>, port: u16) -> Self {
        Self {
            provider,
            host: host.into(),
            port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until SIGINT/SIGTERM, then reset the pool.
    pub async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let app = router(AppState::new(self.provider.clone()));

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {bind_addr}: {e}"),
                "Check that the port is available",
            )
        })?;
        info!(addr = %bind_addr, "HTTP server listening");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        let outcome = tokio::select! {
            result = server => match result {
                Ok(()) => {
                    info!("HTTP server stopped");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "HTTP server error");
                    Err(DbError::internal(format!("HTTP server error: {e}")))
                }
            },
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        info!("Closing database pool");
        self.provider.reset_pool().await;

        outcome
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
