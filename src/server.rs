//! Directory server implementation
//!
//! This module wires the registry, the rate limiter, and the HTTP surface
//! together and runs the background eviction sweep for the lifetime of the
//! server.

use std::collections::HashSet;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::create_router;
use crate::config::{ConfigError, DirectoryConfig};
use crate::limit::RequestLimiter;
use crate::registry::ServerRegistry;

// ============================================================================
// App State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Registration store.
    pub registry: Arc<ServerRegistry>,

    /// Per-source-IP request limiter.
    pub limiter: Arc<RequestLimiter>,

    /// Sources whose reports are acknowledged but dropped.
    pub blacklist: Arc<HashSet<IpAddr>>,

    /// Immutable configuration.
    pub config: Arc<DirectoryConfig>,

    /// Server start time.
    pub start_time: Instant,
}

// ============================================================================
// Directory Server
// ============================================================================

/// Main directory server.
pub struct DirectoryServer {
    config: DirectoryConfig,
    state: AppState,
}

impl DirectoryServer {
    /// Create a new directory server from a validated configuration.
    pub fn new(config: DirectoryConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = Arc::new(ServerRegistry::new(
            config.stale_timeout,
            config.official_servers.clone(),
        ));
        let limiter = Arc::new(RequestLimiter::new(config.rate_limit_per_minute));
        let blacklist = Arc::new(config.blacklist_addrs());

        let state = AppState {
            registry,
            limiter,
            blacklist,
            config: Arc::new(config.clone()),
            start_time: Instant::now(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes.
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

    /// Start the server and run until the process is killed.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.serve(std::future::pending()).await
    }

    /// Start the server, shutting down gracefully when `shutdown_signal`
    /// resolves. The background sweep is cancelled on the way out.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        self.serve(shutdown_signal).await
    }

    async fn serve(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!(%addr, "starting directory server");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let sweeper = self.start_background_tasks();

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(ServerError::Serve);

        sweeper.abort();
        tracing::info!("directory server shutdown complete");
        result
    }

    /// Start the background sweep task. The handle is retained by the caller
    /// so the task can be cancelled instead of leaking.
    fn start_background_tasks(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.state.registry.clone();
        let limiter = self.state.limiter.clone();
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = registry.sweep_once().await;
                limiter.prune();
                if removed > 0 {
                    tracing::debug!(removed, "sweep evicted stale registrations");
                }
            }
        });

        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "background sweep started"
        );
        handle
    }

    /// Get server info.
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            allowed_agent: self.config.allowed_agent.clone(),
            stale_timeout: self.config.stale_timeout,
            sweep_interval: self.config.sweep_interval,
            official_servers: self.config.official_servers.len(),
            blacklisted_sources: self.state.blacklist.len(),
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub allowed_agent: String,
    pub stale_timeout: std::time::Duration,
    pub sweep_interval: std::time::Duration,
    pub official_servers: usize,
    pub blacklisted_sources: usize,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string.
    pub fn display(&self) -> String {
        format!(
            "Directory Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Allowed Agent: {}\n\
             Stale Timeout: {}\n\
             Sweep Interval: {}\n\
             Official Servers: {}\n\
             Blacklisted Sources: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.allowed_agent,
            humantime::format_duration(self.stale_timeout),
            humantime::format_duration(self.sweep_interval),
            self.official_servers,
            self.blacklisted_sources,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled {
                "enabled"
            } else {
                "disabled"
            }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to bind to the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
