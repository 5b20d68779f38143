//! Coordinator server implementation
//!
//! This module wires the coordinator service into an axum server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::store::SharedStore;

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::service::Coordinator;

/// Room for JSON framing and escaping on top of raw batch content
const BODY_OVERHEAD: usize = 1 << 20;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Coordinator service
    pub coordinator: Arc<Coordinator>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: CoordinatorConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main Coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a new coordinator server, opening the configured store
    pub fn new(config: CoordinatorConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store = config
            .store
            .open()
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        Self::with_store(config, store)
    }

    /// Create a server over an already opened store
    pub fn with_store(config: CoordinatorConfig, store: SharedStore) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let state = AppState {
            coordinator: Arc::new(Coordinator::new(&config, store)),
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Coordinator service behind the server
    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.state.coordinator.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let body_limit = self.config.max_batch_bytes.saturating_mul(2).saturating_add(BODY_OVERHEAD);
        let mut router = create_router(self.state.clone()).layer(DefaultBodyLimit::max(body_limit));

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!(%addr, "Starting Coordinator server (with graceful shutdown)");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("Coordinator server shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            max_plugins: self.config.max_plugins,
            debug_all: self.config.debug_all,
            debug_plugins: self.config.debug_plugins.clone(),
            max_files_per_batch: self.config.max_files_per_batch,
            max_batch_bytes: self.config.max_batch_bytes,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub max_plugins: usize,
    pub debug_all: bool,
    pub debug_plugins: Vec<String>,
    pub max_files_per_batch: usize,
    pub max_batch_bytes: usize,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let debug = if self.debug_all {
            "all plugins".to_string()
        } else if self.debug_plugins.is_empty() {
            "none".to_string()
        } else {
            self.debug_plugins.join(", ")
        };

        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Max Plugins: {}\n\
             Debug Mode: {}\n\
             Batch Limits: {} files / {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.max_plugins,
            debug,
            self.max_files_per_batch,
            crate::utils::format_bytes(self.max_batch_bytes as u64),
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================
