//! HTTP server setup and lifecycle management
//!
//! This module handles:
//! - Server configuration
//! - TCP listener setup
//! - Graceful shutdown on signals (SIGTERM, SIGINT)

use crate::{routes, state::AppState};
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// HTTP server instance
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind to the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.addr();
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))
    }

    /// Serve on `listener` until a shutdown signal arrives
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Server listening on http://{}", local_addr);
        info!("Health check endpoint: http://{}/health", local_addr);

        let app = routes::create_router(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Bind and serve until shutdown
    pub async fn run(self) -> Result<()> {
        info!(host = %self.config.host, port = self.config.port, "Starting Inkwell API server");
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

/// Builder for creating a server with custom configuration
pub struct ServerBuilder {
    config: ServerConfig,
    state: Option<AppState>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            state: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Server> {
        let state = self.state.context("Application state is required")?;
        Ok(Server::new(self.config, state))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_server_builder() {
        let server = ServerBuilder::new()
            .host("127.0.0.1")
            .port(9090)
            .state(AppState::default())
            .build()
            .unwrap();

        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 9090);
    }

    #[test]
    fn test_server_builder_missing_state() {
        let result = ServerBuilder::new().build();
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("state"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = ServerBuilder::new()
            .host("127.0.0.1")
            .port(0)
            .state(AppState::default())
            .build()
            .unwrap();

        let listener = server.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
