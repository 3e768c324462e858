//! lusd - game server directory service
//!
//! A directory for ephemeral game-server registrations: servers announce
//! themselves over HTTP, the service keeps a live view of who is currently
//! active, and clients fetch that view (merged with a static official list)
//! for discovery.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading, sanitation, and env overrides
//! - [`registry`] - The registration store with staleness-based expiry
//! - [`limit`] - Per-client request limiting
//! - [`api`] - HTTP routes and handlers
//! - [`server`] - Server assembly and the background sweep
//!
//! # Example
//!
//! ```no_run
//! use lusd::config::DirectoryConfig;
//! use lusd::server::DirectoryServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DirectoryConfig::default();
//!     let server = DirectoryServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod limit;
pub mod registry;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, DirectoryConfig, DirectoryConfigBuilder};
    pub use crate::limit::RequestLimiter;
    pub use crate::registry::{Clock, RegistryStats, ServerRegistry, SystemClock};
    pub use crate::server::{AppState, DirectoryServer, ServerError, ServerInfo};
}

// Direct re-exports for convenience
pub use config::DirectoryConfig;
pub use registry::ServerRegistry;
pub use server::DirectoryServer;
