//! HTTP server implementation.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::service::HouseService;

use super::routes::routes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            await_explicit_shutdown: false,
        }
    }
}

/// Start the HTTP server with provided service.
pub async fn serve(config: ServerConfig, service: Arc<HouseService>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, config.await_explicit_shutdown, service).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(
    listener: TcpListener,
    await_explicit_shutdown: bool,
    service: Arc<HouseService>,
) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    let app = routes(service.clone());
    let actual_addr = listener.local_addr()?;

    info!("Starting throne server on {}", actual_addr);

    let draining = service.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal(await_explicit_shutdown, shutdown_rx).await;
            let health = draining.health();
            info!(
                %reason,
                pending = health.pending,
                occupied = health.occupied,
                next_up = ?health.next_up,
                "Draining connections"
            );
        })
        .await?;

    // A signal, not /shutdown, may have ended the loop.
    service.trigger_shutdown();
    info!(
        pending = service.queue().pending_count(),
        occupied = service.queue().is_occupied(),
        "Server shutdown complete"
    );

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownReason {
    Interrupt,
    Terminate,
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Requested => "/shutdown",
        })
    }
}

/// Resolves once the first shutdown source fires.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. That only happens when the
/// tokio runtime is misconfigured, which should fail fast at startup.
async fn shutdown_signal(
    await_explicit_shutdown: bool,
    shutdown_rx: watch::Receiver<bool>,
) -> ShutdownReason {
    tokio::select! {
        _ = interrupt() => ShutdownReason::Interrupt,
        _ = terminate(await_explicit_shutdown) => ShutdownReason::Terminate,
        _ = requested(shutdown_rx) => ShutdownReason::Requested,
    }
}

async fn interrupt() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
}

#[cfg(unix)]
async fn terminate(await_explicit_shutdown: bool) {
    use tokio::signal::unix::{SignalKind, signal};

    if await_explicit_shutdown {
        info!("await_explicit_shutdown enabled, ignoring SIGTERM");
        return std::future::pending().await;
    }
    signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
        .recv()
        .await;
}

#[cfg(not(unix))]
async fn terminate(_await_explicit_shutdown: bool) {
    std::future::pending().await
}

/// Resolves when the service flag flips. A dropped sender never resolves.
async fn requested(mut shutdown_rx: watch::Receiver<bool>) {
    if shutdown_rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}
