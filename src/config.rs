//! Directory service configuration
//!
//! Settings are loaded from a TOML file, sanitized, and then overridden by
//! `LUSD_*` environment variables. Loading never fails: a missing or corrupt
//! file falls back to defaults (and a default file is written next to the
//! requested path), and invalid overrides are logged and ignored, so the
//! service always starts with a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default shared-secret identifier expected from reporting game servers.
pub const DEFAULT_ALLOWED_AGENT: &str = "LU-Server/0.1";

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:80";

/// Configuration for the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Server bind address.
    pub bind_address: SocketAddr,

    /// User-Agent value a report must carry to be accepted.
    pub allowed_agent: String,

    /// Age beyond which a reported server is no longer active.
    #[serde(with = "humantime_serde")]
    pub stale_timeout: Duration,

    /// Cadence of the background eviction sweep.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Source IPs whose reports are acknowledged but never stored.
    pub blacklist: Vec<String>,

    /// Addresses always included in the active list.
    pub official_servers: Vec<String>,

    /// Per-source-IP request quota.
    pub rate_limit_per_minute: u32,

    /// Enable CORS for the HTTP surface.
    pub enable_cors: bool,

    /// Enable per-request tracing.
    pub enable_request_logging: bool,

    /// Log file path, used when `log_enabled` is set.
    pub log_file: PathBuf,

    /// Mirror logs to `log_file` in addition to the console.
    pub log_enabled: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.parse().unwrap(),
            allowed_agent: DEFAULT_ALLOWED_AGENT.to_string(),
            stale_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            blacklist: Vec::new(),
            official_servers: Vec::new(),
            rate_limit_per_minute: 60,
            enable_cors: false,
            enable_request_logging: true,
            log_file: PathBuf::from("lusd_server.log"),
            log_enabled: true,
        }
    }
}

impl DirectoryConfig {
    /// Create a new config builder.
    pub fn builder() -> DirectoryConfigBuilder {
        DirectoryConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.port() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bind_address",
                reason: "listen port must be non-zero".to_string(),
            });
        }

        if self.allowed_agent.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "allowed_agent",
                reason: "identifier must not be empty".to_string(),
            });
        }

        if self.stale_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "stale_timeout",
                reason: "timeout must be positive".to_string(),
            });
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval",
                reason: "interval must be positive".to_string(),
            });
        }

        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit_per_minute",
                reason: "quota must allow at least 1 request".to_string(),
            });
        }

        if self.log_enabled && self.log_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "log_file",
                reason: "path must not be empty when log_enabled is set".to_string(),
            });
        }

        Ok(())
    }

    /// Parse a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults on any fault.
    ///
    /// When the file is missing, a default configuration is written there so
    /// operators have something to edit. The result is sanitized, repaired
    /// field-by-field, and finally overridden by environment variables.
    pub fn load(path: &Path) -> Self {
        let mut config = if path.exists() {
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unusable config file, using defaults");
                    Self::default()
                }
            }
        } else {
            tracing::info!(path = %path.display(), "config file not found, creating default");
            let config = Self::default();
            config.write_default(path);
            config
        };

        config.sanitize();
        config.repair();
        config.apply_env_overrides();
        config
    }

    /// Write this configuration to `path`. Best effort: failures are logged,
    /// the in-memory defaults remain in use.
    fn write_default(&self, path: &Path) {
        let rendered = match toml::to_string_pretty(self) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, "could not render default config");
                return;
            }
        };

        if let Err(e) = std::fs::write(path, rendered) {
            tracing::warn!(path = %path.display(), error = %e, "could not write default config");
        } else {
            tracing::info!(path = %path.display(), "wrote default config");
        }
    }

    /// Drop malformed blacklist and official-server entries.
    ///
    /// Blacklist entries must be IP literals; official servers must be
    /// `host:port` or a bare host where the host is an IP literal. Skipped
    /// entries are logged, never fatal.
    pub fn sanitize(&mut self) {
        self.blacklist.retain(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return false;
            }
            let ok = entry.parse::<IpAddr>().is_ok();
            if !ok {
                tracing::warn!(entry, "skipping invalid IP in blacklist");
            }
            ok
        });

        self.official_servers = self
            .official_servers
            .iter()
            .map(|addr| addr.trim().to_string())
            .filter(|addr| {
                if addr.is_empty() {
                    return false;
                }
                let ok = is_valid_server_addr(addr);
                if !ok {
                    tracing::warn!(address = %addr, "skipping official server: not a valid IP address");
                }
                ok
            })
            .collect();
    }

    /// Replace individually invalid fields with their defaults.
    fn repair(&mut self) {
        let defaults = Self::default();

        if self.bind_address.port() == 0 {
            tracing::warn!("invalid listen port, using default");
            self.bind_address.set_port(defaults.bind_address.port());
        }

        if self.allowed_agent.is_empty() {
            tracing::warn!("empty allowed_agent, using default");
            self.allowed_agent = defaults.allowed_agent;
        }

        if self.stale_timeout.is_zero() {
            tracing::warn!("invalid stale_timeout, using default");
            self.stale_timeout = defaults.stale_timeout;
        }

        if self.sweep_interval.is_zero() {
            tracing::warn!("invalid sweep_interval, using default");
            self.sweep_interval = defaults.sweep_interval;
        }

        if self.rate_limit_per_minute == 0 {
            tracing::warn!("invalid rate_limit_per_minute, using default");
            self.rate_limit_per_minute = defaults.rate_limit_per_minute;
        }

        if self.log_file.as_os_str().is_empty() {
            tracing::warn!("empty log_file, using default");
            self.log_file = defaults.log_file;
        }
    }

    /// Apply `LUSD_*` environment overrides. Each value is validated before
    /// it is applied; invalid values are logged and ignored so the settings
    /// already loaded are retained.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("LUSD_PORT") {
            match port.parse::<u16>() {
                Ok(p) if p > 0 => {
                    self.bind_address.set_port(p);
                    tracing::info!(port = p, "listen port overridden by environment");
                }
                _ => tracing::warn!(value = %port, "invalid LUSD_PORT, ignoring"),
            }
        }

        if let Ok(agent) = std::env::var("LUSD_USER_AGENT") {
            if !agent.is_empty() && agent.len() <= 100 {
                self.allowed_agent = agent;
                tracing::info!("allowed agent overridden by environment");
            } else {
                tracing::warn!("invalid LUSD_USER_AGENT, ignoring");
            }
        }

        if let Ok(timeout) = std::env::var("LUSD_STALE_TIMEOUT") {
            match humantime::parse_duration(&timeout) {
                Ok(t) if !t.is_zero() => {
                    self.stale_timeout = t;
                    tracing::info!(timeout = %timeout, "stale timeout overridden by environment");
                }
                _ => tracing::warn!(value = %timeout, "invalid LUSD_STALE_TIMEOUT, ignoring"),
            }
        }

        if let Ok(log_file) = std::env::var("LUSD_LOG_FILE") {
            if !log_file.is_empty() && log_file.len() <= 255 && !log_file.contains("..") {
                self.log_file = PathBuf::from(log_file);
                tracing::info!("log file overridden by environment");
            } else {
                tracing::warn!("invalid LUSD_LOG_FILE, ignoring");
            }
        }

        if let Ok(log_enabled) = std::env::var("LUSD_LOG_ENABLED") {
            match log_enabled.parse::<bool>() {
                Ok(enabled) => {
                    self.log_enabled = enabled;
                    tracing::info!(enabled, "log enable flag overridden by environment");
                }
                Err(_) => tracing::warn!(value = %log_enabled, "invalid LUSD_LOG_ENABLED, ignoring"),
            }
        }
    }

    /// The blacklist as parsed addresses. Entries are validated by
    /// [`sanitize`](Self::sanitize); anything unparseable left over is
    /// dropped here as well.
    #[must_use]
    pub fn blacklist_addrs(&self) -> HashSet<IpAddr> {
        self.blacklist
            .iter()
            .filter_map(|entry| entry.parse().ok())
            .collect()
    }
}

/// Check an official-server entry: `host:port` or bare host, IP literal host.
fn is_valid_server_addr(addr: &str) -> bool {
    addr.parse::<SocketAddr>().is_ok() || addr.parse::<IpAddr>().is_ok()
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`DirectoryConfig`].
#[derive(Debug, Default)]
pub struct DirectoryConfigBuilder {
    bind_address: Option<SocketAddr>,
    allowed_agent: Option<String>,
    stale_timeout: Option<Duration>,
    sweep_interval: Option<Duration>,
    blacklist: Option<Vec<String>>,
    official_servers: Option<Vec<String>>,
    rate_limit_per_minute: Option<u32>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
    log_file: Option<PathBuf>,
    log_enabled: Option<bool>,
}

impl DirectoryConfigBuilder {
    /// Set bind address.
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string.
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address",
            reason: format!("invalid address: {addr}"),
        })?);
        Ok(self)
    }

    /// Set the required report identifier.
    pub fn allowed_agent(mut self, agent: impl Into<String>) -> Self {
        self.allowed_agent = Some(agent.into());
        self
    }

    /// Set the staleness timeout.
    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = Some(timeout);
        self
    }

    /// Set the sweep cadence.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set the source-IP blacklist.
    pub fn blacklist(mut self, entries: Vec<String>) -> Self {
        self.blacklist = Some(entries);
        self
    }

    /// Set the official server list.
    pub fn official_servers(mut self, servers: Vec<String>) -> Self {
        self.official_servers = Some(servers);
        self
    }

    /// Set the per-IP request quota.
    pub fn rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = Some(limit);
        self
    }

    /// Enable/disable CORS.
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging.
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Set the log file path.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Enable/disable file logging.
    pub fn log_enabled(mut self, enabled: bool) -> Self {
        self.log_enabled = Some(enabled);
        self
    }

    /// Build the config.
    pub fn build(self) -> Result<DirectoryConfig, ConfigError> {
        let defaults = DirectoryConfig::default();
        let config = DirectoryConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            allowed_agent: self.allowed_agent.unwrap_or(defaults.allowed_agent),
            stale_timeout: self.stale_timeout.unwrap_or(defaults.stale_timeout),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            blacklist: self.blacklist.unwrap_or(defaults.blacklist),
            official_servers: self.official_servers.unwrap_or(defaults.official_servers),
            rate_limit_per_minute: self
                .rate_limit_per_minute
                .unwrap_or(defaults.rate_limit_per_minute),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
            log_file: self.log_file.unwrap_or(defaults.log_file),
            log_enabled: self.log_enabled.unwrap_or(defaults.log_enabled),
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ============================================================================
// Tests
// ============================================================================
