//! Server assembly and lifecycle
//!
//! Wires the store, relay, broker, dispatcher and scheduling engine together
//! and serves the HTTP API until a shutdown signal arrives.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::notifications::{Dispatcher, ShutdownMode};
use crate::realtime::{self, RealtimeBroker, Relay};
use crate::scheduler::SchedulingEngine;
use crate::storage::Store;

use super::api::create_router;
use super::config::ServerConfig;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Shift lifecycle entry point
    pub engine: Arc<SchedulingEngine>,

    /// Storage collaborator, shared with the engine
    pub store: Arc<dyn Store>,

    /// Realtime subscriber registry
    pub broker: RealtimeBroker,

    /// Server start time
    pub start_time: Instant,

    /// HTTP configuration
    pub config: ServerConfig,
}

// ============================================================================
// Shiftboard Server
// ============================================================================

/// HTTP server plus the background components it owns
pub struct ShiftboardServer {
    config: ServerConfig,
    state: AppState,
}

impl ShiftboardServer {
    /// Build every component from configuration, connecting the configured relay
    pub async fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let relay = realtime::connect(&config.broker.relay)
            .await
            .map_err(|e| ServerError::InitError(format!("relay: {e}")))?;

        Self::with_relay(config, store, relay).await
    }

    /// Build every component on top of an existing relay
    pub async fn with_relay(
        config: Config,
        store: Arc<dyn Store>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self, ServerError> {
        config
            .server
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let broker = RealtimeBroker::connect(&config.broker, relay)
            .await
            .map_err(|e| ServerError::InitError(format!("broker: {e}")))?;

        let dispatcher = Dispatcher::start(store.clone(), &config.dispatcher)
            .map_err(|e| ServerError::InitError(format!("dispatcher: {e}")))?;

        let engine = Arc::new(SchedulingEngine::new(
            store.clone(),
            broker.clone(),
            dispatcher,
        ));

        let state = AppState {
            engine,
            store,
            broker,
            start_time: Instant::now(),
            config: config.server.clone(),
        };

        Ok(Self {
            config: config.server,
            state,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    ///
    /// On shutdown the broker closes first so open event streams end and the
    /// graceful shutdown can complete; the dispatcher then drains its queue.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        tracing::info!(
            addr = %local_addr,
            instance_id = %self.state.broker.instance_id(),
            "Starting shiftboard server"
        );

        let broker = self.state.broker.clone();
        let signal = async move {
            shutdown_signal.await;
            tracing::info!("Shutdown signal received, closing realtime streams");
            broker.close();
        };

        let result = axum::serve(listener, self.build_router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        self.shutdown().await;
        tracing::info!("Shiftboard server shutdown complete");
        result
    }

    /// Close the broker and drain the dispatcher
    pub async fn shutdown(&self) {
        self.state.broker.close();
        self.state
            .engine
            .dispatcher()
            .shutdown(ShutdownMode::Drain)
            .await;
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            instance_id: self.state.broker.instance_id().to_string(),
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub instance_id: String,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Shiftboard Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Instance: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.instance_id,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled {
                "enabled"
            } else {
                "disabled"
            },
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Bind error
    BindError(String),

    /// Serve error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::BindError(msg) => write!(f, "Bind error: {msg}"),
            Self::ServeError(msg) => write!(f, "Serve error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}
