//! HTTP and WebSocket server for the relay daemon.
//!
//! The server:
//! - Upgrades `/ws` and `/ws/connect` requests into hub connections
//! - Serves the status, admin broadcast and health endpoints
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ axum Router
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  WebSocket      │────▶│       Hub       │
//! │  upgrade        │     │ (RegistryHandle)│
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection failures are logged and never stop the server

mod error;
mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse, ServerError};
pub use routes::{build_router, AppState, BroadcastRequest, ConnectParams, StatusResponse};

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::hub::Hub;

/// The relay daemon's HTTP server.
pub struct RelayServer {
    listen: SocketAddr,
    hub: Hub,
    admin_token: Option<String>,
    cancel_token: CancellationToken,
}

impl RelayServer {
    pub fn new(
        listen: SocketAddr,
        hub: Hub,
        admin_token: Option<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listen,
            hub,
            admin_token,
            cancel_token,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
    }

    /// Binds the configured address and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen,
                source,
            })?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until the cancellation token
    /// fires. Live connections are closed before in-flight HTTP requests
    /// are drained.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;
        info!(addr = %local_addr, "Relay server listening");

        let router = build_router(AppState::new(self.hub.clone(), self.admin_token));
        let hub = self.hub;
        let cancel_token = self.cancel_token;

        let shutdown = {
            let hub = hub.clone();
            async move {
                cancel_token.cancelled().await;
                info!("Shutdown requested, closing connections");
                hub.shutdown().await;
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        // Covers the case where serving stopped without the token firing
        hub.shutdown().await;
        info!("Relay server stopped");
        Ok(())
    }
}
