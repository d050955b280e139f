//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so integration tests can
//! spin up a real relay on an ephemeral port, exercise its endpoints, and
//! shut it down cleanly. `main.rs` uses the same path with the configured
//! bind address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::PolicyConfig;
use crate::logging::targets;
use crate::server::http::{AppState, MiddlewareConfig};

/// Everything needed to start a relay server.
pub struct ServerConfig {
    pub state: AppState,
    pub middleware_config: MiddlewareConfig,
    pub bind_address: SocketAddr,
    /// When `false` (e.g. in tests), the cache sweep task is not spawned.
    pub spawn_background_tasks: bool,
}

impl ServerConfig {
    /// Production config: system DNS, reqwest transport, default middleware.
    pub fn new(policy: Arc<PolicyConfig>, bind_address: SocketAddr) -> Self {
        ServerConfig {
            state: AppState::from_policy(policy),
            middleware_config: MiddlewareConfig::default(),
            bind_address,
            spawn_background_tasks: true,
        }
    }

    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port) and skips background tasks.
    /// Middleware stays on so response headers can be asserted.
    pub fn for_testing(state: AppState) -> Self {
        ServerConfig {
            state,
            middleware_config: MiddlewareConfig::default(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            spawn_background_tasks: false,
        }
    }
}

/// Handle to a running server. Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Sender that triggers shutdown; used to wire OS signals.
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Wait for the server to exit on its own (after a shutdown signal).
    pub async fn wait(self) {
        match self.server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(target: targets::RELAY, "Server task returned error: {}", e),
            Err(e) => error!(target: targets::RELAY, "Server task panicked: {}", e),
        }
        if let Some(sweep) = self.sweep_task {
            let _ = sweep.await;
        }
    }

    /// Trigger graceful shutdown, stop the sweeper, then await the server task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(sweep) = self.sweep_task {
            if tokio::time::timeout(Duration::from_secs(1), sweep).await.is_err() {
                warn!(target: targets::CACHE, "Cache sweeper did not stop within 1s");
            }
        }

        // Wait for the server task to finish (with a timeout to avoid hanging)
        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(target: targets::RELAY, "Server task returned error: {}", e),
            Ok(Err(e)) => error!(target: targets::RELAY, "Server task panicked: {}", e),
            Err(_) => warn!(target: targets::RELAY, "Server task did not finish within 5s timeout"),
        }
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep_task = if config.spawn_background_tasks {
        let cache = config.state.pipeline.cache().clone();
        let interval = config.state.policy.sweep_interval();
        info!(
            target: targets::CACHE,
            interval_secs = interval.as_secs(),
            capacity = cache.capacity(),
            ttl_secs = cache.ttl().as_secs(),
            "starting cache sweeper"
        );
        Some(cache.start_sweep_task(interval, shutdown_rx.clone()))
    } else {
        None
    };

    let app = crate::server::http::create_router_with_middleware(
        config.state,
        config.middleware_config,
    );

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: targets::RELAY, addr = %local_addr, "media relay listening");

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                // Wait until the shutdown channel is set to true
                loop {
                    if *shutdown_watch.borrow() {
                        break;
                    }
                    if shutdown_watch.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
        sweep_task,
    })
}
