//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (FERRY_*, nested keys joined with `__`)

use anyhow::{Context, Result};
use ferry_core::{ManagerConfig, SenderConfig};
use ferry_protocol::{EnvelopeKey, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Files searched by [`Config::load`], in order.
const CONFIG_PATHS: [&str; 3] = [
    "ferry.toml",
    "/etc/ferry/ferry.toml",
    "~/.config/ferry/ferry.toml",
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

    /// Per-connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Envelope encryption.
    #[serde(default)]
    pub crypto: CryptoConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Per-connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Handler jobs allowed to run at once per connection.
    #[serde(default = "default_work_concurrency")]
    pub work_concurrency: usize,

    /// Outbound bytes queued per connection before sends are refused.
    #[serde(default = "default_send_queue_byte_cap")]
    pub send_queue_byte_cap: usize,

    /// Payloads written per flush tick.
    #[serde(default = "default_send_flush_batch")]
    pub send_flush_batch: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
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

/// Envelope encryption configuration.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte key shared with clients.
    #[serde(default)]
    pub key: Option<String>,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
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

fn default_max_message_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_work_concurrency() -> usize {
    ferry_core::work_queue::DEFAULT_CONCURRENCY
}

fn default_send_queue_byte_cap() -> usize {
    ferry_core::sender::DEFAULT_BYTE_CAP
}

fn default_send_flush_batch() -> usize {
    ferry_core::sender::DEFAULT_FLUSH_BATCH
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
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
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            work_concurrency: default_work_concurrency(),
            send_queue_byte_cap: default_send_queue_byte_cap(),
            send_flush_batch: default_send_flush_batch(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
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

impl Config {
    /// Load configuration from the first config file found, with `FERRY_*`
    /// environment variables layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file or an environment override cannot
    /// be parsed.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::layered(file.as_deref().map(Path::new), env_source())
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

    fn layered(file: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        let source = match file {
            Some(path) => format!("{} + environment", path.display()),
            None => "environment".to_string(),
        };

        builder
            .add_source(env)
            .build()
            .and_then(|layered| layered.try_deserialize::<Self>())
            .with_context(|| format!("Failed to load configuration from {}", source))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Get the envelope key.
    ///
    /// Without a configured key a random one is generated; clients then
    /// cannot talk to this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured key is malformed.
    pub fn envelope_key(&self) -> Result<EnvelopeKey> {
        match &self.crypto.key {
            Some(encoded) => {
                EnvelopeKey::from_base64(encoded).context("Invalid crypto.key")
            }
            None => {
                warn!("No crypto.key configured, using an ephemeral random key");
                Ok(EnvelopeKey::generate())
            }
        }
    }

    /// Map into connection manager settings.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            work_concurrency: self.limits.work_concurrency,
            sender: SenderConfig {
                byte_cap: self.limits.send_queue_byte_cap,
                flush_batch: self.limits.send_flush_batch,
            },
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix("FERRY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
