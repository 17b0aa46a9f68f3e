//! Configuration management for the presence relay.
//!
//! This module handles loading, validation, and conversion of the relay
//! configuration from TOML files, command-line arguments and the `PORT`
//! environment variable.

use presence_server::{ServerConfig, DEFAULT_NUM_POINTERS, MAX_SLOTS};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network settings
    pub server: ServerSettings,
    /// Pool sizes and liveness timings
    #[serde(default)]
    pub relay: RelaySettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network binding and socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    #[serde(default)]
    pub use_reuse_port: bool,
    /// Frames that may queue for one client before broadcasts skip it
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Relay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Maximum simultaneous connections (1..=255)
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
    /// Pointer pool size; 0 identifies clients by slot instead
    #[serde(default = "default_num_pointers")]
    pub num_pointers: usize,
    #[serde(default = "default_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Silence after which a client is evicted
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_max_slots() -> usize {
    MAX_SLOTS
}

fn default_num_pointers() -> usize {
    DEFAULT_NUM_POINTERS
}

fn default_interval_ms() -> u64 {
    4000
}

fn default_idle_timeout_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            use_reuse_port: false,
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            num_pointers: default_num_pointers(),
            heartbeat_interval_ms: default_interval_ms(),
            sweep_interval_ms: default_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Binds every interface on the given port, as hosting platforms that
    /// export `PORT` expect. The address family of `bind_address` is kept.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<(), String> {
        let Some(port) = port else {
            return Ok(());
        };

        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| format!("Invalid PORT value: {port}"))?;
        let mut address: SocketAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| format!("Invalid bind address: {}", self.server.bind_address))?;
        let unspecified = match address.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        address.set_ip(unspecified);
        address.set_port(port);
        self.server.bind_address = address.to_string();
        Ok(())
    }

    /// Converts the application configuration to the relay's configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_slots: self.relay.max_slots,
            num_pointers: match self.relay.num_pointers {
                0 => None,
                n => Some(n),
            },
            heartbeat_interval_ms: self.relay.heartbeat_interval_ms,
            sweep_interval_ms: self.relay.sweep_interval_ms,
            idle_timeout_ms: self.relay.idle_timeout_ms,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            use_reuse_port: self.server.use_reuse_port,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        let server_config = self.to_server_config().map_err(|e| e.to_string())?;
        server_config.validate().map_err(|e| e.to_string())
    }
}
