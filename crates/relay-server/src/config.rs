//! Server configuration.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first of the default paths)
//! - Environment variables (`RELAY_*`, nested keys separated by `__`)
//! - The plain `PORT` environment variable

use anyhow::{Context, Result};
use relay_core::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default configuration file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Dispatch engine configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the engine's operation queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Unregister connections whose outbound queue is full or closed.
    #[serde(default)]
    pub evict_on_delivery_failure: bool,
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

fn default_host() -> String {
    "0.0.0.0".to_string()
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

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_queue_capacity() -> usize {
    256
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            dispatch: DispatchConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            outbound_capacity: default_outbound_capacity(),
            evict_on_delivery_failure: false,
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

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix("RELAY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from every source.
    ///
    /// An explicit `path` must exist. Without one, the default paths are
    /// searched and a missing file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, or an
    /// override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(),
        };
        Self::build(file.as_deref(), environment(), std::env::var("PORT").ok())
    }

    fn find_default_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn build(
        file: Option<&Path>,
        env: ::config::Environment,
        port: Option<String>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(::config::File::from(file).required(true));
        }

        let mut config: Config = builder
            .add_source(env)
            .build()
            .with_context(|| match file {
                Some(file) => format!("Failed to load config file: {}", file.display()),
                None => "Failed to load configuration".to_string(),
            })?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(port) = port {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Engine settings derived from the dispatch section.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.dispatch.queue_capacity,
            outbound_capacity: self.dispatch.outbound_capacity,
            evict_on_delivery_failure: self.dispatch.evict_on_delivery_failure,
        }
    }
}
