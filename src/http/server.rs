//! HTTP server startup and lifecycle.
//!
//! The server is an explicit value rather than process-global state:
//!
//! 1. Build a [`ServerConfig`] (usually via [`ServerConfig::from_app_config`]).
//! 2. [`HttpServer::new`] creates the server; [`HttpServer::handle`] hands out
//!    a cloneable [`ServerHandle`] before it starts.
//! 3. [`HttpServer::run`] binds and serves until shutdown is requested.
//! 4. [`ServerHandle::shutdown`] (or SIGINT/SIGTERM when signal handling is
//!    enabled) stops accepting connections and drains in-flight requests for
//!    up to the configured grace period, after which `run` returns.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;

use crate::config::{AppConfig, RunMode};

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid bind address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Everything the HTTP server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// How long to wait for open connections on shutdown
    pub shutdown_grace: Duration,
    /// Install SIGINT/SIGTERM handlers that trigger graceful shutdown
    pub handle_signals: bool,
}

impl ServerConfig {
    /// Resolve the bind address from configuration and run mode.
    pub fn from_app_config(config: &AppConfig, mode: RunMode) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.http.host, config.http.port(mode));
        let addr = address
            .parse::<SocketAddr>()
            .map_err(|e| ServerError::Address {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            addr,
            shutdown_grace: Duration::from_secs(config.http.shutdown_grace_seconds),
            handle_signals: true,
        })
    }
}

/// Cloneable control handle for a running [`HttpServer`].
#[derive(Clone)]
pub struct ServerHandle {
    inner: Handle,
    grace: Duration,
}

impl ServerHandle {
    /// Wait until the server is listening and return the bound address.
    ///
    /// Returns `None` if the server failed to bind or already stopped.
    pub async fn listening(&self) -> Option<SocketAddr> {
        self.inner.listening().await
    }

    /// Stop accepting connections and drain in-flight requests.
    pub fn shutdown(&self) {
        tracing::info!(grace_secs = self.grace.as_secs(), "Graceful shutdown requested");
        self.inner.graceful_shutdown(Some(self.grace));
    }
}

/// HTTP server bound to one address.
pub struct HttpServer {
    config: ServerConfig,
    handle: ServerHandle,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        let handle = ServerHandle {
            inner: Handle::new(),
            grace: config.shutdown_grace,
        };
        Self { config, handle }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Serve `app` until shutdown.
    ///
    /// This function blocks until the server shuts down.
    pub async fn run(self, app: Router) -> Result<(), ServerError> {
        let addr = self.config.addr;
        tracing::info!(%addr, "Starting HTTP server");

        if self.config.handle_signals {
            shutdown::setup_shutdown_handler(self.handle.clone());
        }

        axum_server::bind(addr)
            .handle(self.handle.inner.clone())
            .serve(app.into_make_service())
            .await?;

        tracing::info!(%addr, "HTTP server stopped");
        Ok(())
    }
}
