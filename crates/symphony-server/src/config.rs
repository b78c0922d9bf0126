//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`$SYMPHONY_CONFIG`, `symphony.toml`,
//!   `/etc/symphony/symphony.toml` or `~/.config/symphony/symphony.toml`)
//! - Environment variables (`SYMPHONY_PORT`, `SYMPHONY_CONNECTION__PING_INTERVAL_MS`, ...)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphony_core::{ConnectionConfig, HubConfig};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Per-connection queues and liveness.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Outbound queue capacity in frames.
    #[serde(default = "default_queue_capacity")]
    pub outbound_capacity: usize,

    /// Inbound queue capacity in frames.
    #[serde(default = "default_queue_capacity")]
    pub inbound_capacity: usize,

    /// Ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Time without a pong before the connection is dropped, in milliseconds.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Write timeout in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the authenticated user id, set by the upstream gateway.
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,
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

    /// Registry gauge refresh interval in milliseconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_pong_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_message_size() -> usize {
    4096
}

fn default_user_id_header() -> String {
    "x-user-id".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_stats_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            connection: ConnectionSettings::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: default_queue_capacity(),
            inbound_capacity: default_queue_capacity(),
            ping_interval_ms: default_ping_interval(),
            pong_timeout_ms: default_pong_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_id_header: default_user_id_header(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            stats_interval_ms: default_stats_interval(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = Self::find_file() {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("SYMPHONY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SYMPHONY_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        let config_paths = [
            "symphony.toml",
            "/etc/symphony/symphony.toml",
            "~/.config/symphony/symphony.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
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

        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        if connection.outbound_capacity == 0 || connection.inbound_capacity == 0 {
            bail!("connection queue capacities must be positive");
        }
        if connection.ping_interval_ms == 0 {
            bail!("connection.ping_interval_ms must be positive");
        }
        if connection.pong_timeout_ms <= connection.ping_interval_ms {
            bail!(
                "connection.pong_timeout_ms ({}) must exceed connection.ping_interval_ms ({})",
                connection.pong_timeout_ms,
                connection.ping_interval_ms
            );
        }
        if !self.websocket_path.starts_with('/') {
            bail!("websocket_path must start with '/'");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Connection settings for the hub.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        let connection = &self.connection;
        ConnectionConfig {
            outbound_capacity: connection.outbound_capacity,
            inbound_capacity: connection.inbound_capacity,
            ping_interval: Duration::from_millis(connection.ping_interval_ms),
            pong_timeout: Duration::from_millis(connection.pong_timeout_ms),
            write_timeout: Duration::from_millis(connection.write_timeout_ms),
        }
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            connection: self.connection_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.websocket_path, "/ws");
        assert_eq!(config.auth.user_id_header, "x-user-id");
        assert_eq!(config.limits.max_message_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [connection]
            ping_interval_ms = 1000
            pong_timeout_ms = 3000

            [auth]
            user_id_header = "x-authenticated-user"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.auth.user_id_header, "x-authenticated-user");
        assert_eq!(config.connection.outbound_capacity, 256);

        let connection = config.connection_config();
        assert_eq!(connection.ping_interval, Duration::from_secs(1));
        assert_eq!(connection.pong_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_pong_timeout_must_exceed_ping_interval() {
        let mut config = Config::default();
        config.connection.pong_timeout_ms = config.connection.ping_interval_ms;
        assert!(config.validate().is_err());
    }
}
