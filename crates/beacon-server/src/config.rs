//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_*)
//! - TOML configuration file
//! - Command line arguments (override both)

use anyhow::{bail, Context, Result};
use beacon_core::LoginFlagPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backing store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Presence tracking configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which presence store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis sorted sets.
    #[default]
    Redis,
    /// Process-local maps; counts are per instance and lost on restart.
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis address, `host:port` or a `redis://` URL.
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,
}

/// Presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Session time-to-live in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Maximum age of a served count in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Interval between sweeps of expired sessions in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// What a heartbeat without `logged-in` does to an authenticated session.
    #[serde(default)]
    pub omitted_login_flag: LoginFlagPolicy,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081)
}

fn default_redis_addr() -> String {
    std::env::var("BEACON_REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string())
}

fn default_ttl() -> u64 {
    11 * 60 // 11 minutes
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: StoreConfig::default(),
            presence: PresenceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_addr: default_redis_addr(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            refresh_interval_secs: default_refresh_interval(),
            sweep_interval_secs: default_sweep_interval(),
            omitted_login_flag: LoginFlagPolicy::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PresenceConfig {
    /// Session time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Count refresh interval, also the staleness bound for queries.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// An explicit path must exist; otherwise the default locations are
    /// tried in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        // Try to load from default paths
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Set host and port from a `host:port` listen address.
    ///
    /// A leading `:` (as in `:8081`) binds all interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is missing or not a number.
    pub fn set_listen_addr(&mut self, addr: &str) -> Result<()> {
        let (host, port) = addr
            .rsplit_once(':')
            .with_context(|| format!("Listen address must be host:port, got {}", addr))?;
        self.port = port
            .parse()
            .with_context(|| format!("Invalid port in listen address: {}", addr))?;
        self.host = if host.is_empty() {
            "0.0.0.0".to_string()
        } else {
            host.trim_start_matches('[').trim_end_matches(']').to_string()
        };
        Ok(())
    }

    /// Check the settings are usable together.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let presence = &self.presence;
        if presence.ttl_secs == 0 {
            bail!("presence.ttl_secs must be greater than zero");
        }
        if presence.refresh_interval_secs == 0 || presence.sweep_interval_secs == 0 {
            bail!("presence refresh and sweep intervals must be greater than zero");
        }
        if presence.refresh_interval_secs >= presence.ttl_secs {
            bail!(
                "presence.refresh_interval_secs ({}) must be shorter than ttl_secs ({})",
                presence.refresh_interval_secs,
                presence.ttl_secs
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };
        addr.parse()
            .with_context(|| format!("Invalid bind address: {}", addr))
    }
}
