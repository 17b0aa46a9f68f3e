//! Server configuration types and defaults.
//!
//! This module contains the relay configuration structure and the default
//! values used to initialize the presence server.

use crate::error::ServerError;
use std::net::SocketAddr;

/// Hard upper bound on the number of simultaneously admitted connections.
///
/// Identities travel as a single byte on the wire, so the slot pool can never
/// exceed this.
pub const MAX_SLOTS: usize = 255;

/// Default size of the pointer pool.
pub const DEFAULT_NUM_POINTERS: usize = 20;

/// Configuration structure for the relay server.
///
/// Contains the network settings, pool sizes and the liveness timings that
/// drive heartbeats and the idle reaper.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Capacity of the slot pool (at most [`MAX_SLOTS`])
    pub max_slots: usize,

    /// Size of the pointer pool, or `None` to identify clients by slot
    pub num_pointers: Option<usize>,

    /// Period of the per-connection heartbeat in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Period of the idle sweep and roster rebroadcast in milliseconds
    pub sweep_interval_ms: u64,

    /// Inactivity after which a connection is terminated, in milliseconds
    pub idle_timeout_ms: u64,

    /// Number of frames that may be queued for a single client before
    /// broadcasts start skipping it
    pub outbound_queue_capacity: usize,

    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_slots: MAX_SLOTS,
            num_pointers: Some(DEFAULT_NUM_POINTERS),
            heartbeat_interval_ms: 4000,
            sweep_interval_ms: 4000,
            idle_timeout_ms: 30 * 60 * 1000,
            outbound_queue_capacity: 64,
            use_reuse_port: false,
        }
    }
}

impl ServerConfig {
    /// Checks that pool sizes fit the one-byte identity field and that the
    /// timers are usable.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_slots == 0 || self.max_slots > MAX_SLOTS {
            return Err(ServerError::Config(format!(
                "max_slots must be between 1 and {MAX_SLOTS}, got {}",
                self.max_slots
            )));
        }

        // The pool size itself is the observer sentinel, so it must fit in a byte.
        if let Some(num_pointers) = self.num_pointers {
            if num_pointers == 0 || num_pointers > u8::MAX as usize {
                return Err(ServerError::Config(format!(
                    "num_pointers must be between 1 and {}, got {num_pointers}",
                    u8::MAX
                )));
            }
        }

        if self.heartbeat_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(ServerError::Config(
                "heartbeat and sweep intervals must be non-zero".to_string(),
            ));
        }

        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::Config(
                "outbound_queue_capacity must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_slots, 255);
        assert_eq!(config.heartbeat_interval_ms, 4000);
        assert_eq!(config.sweep_interval_ms, 4000);
        assert_eq!(config.idle_timeout_ms, 1_800_000);
    }

    #[test]
    fn test_pool_bounds_rejected() {
        let config = ServerConfig {
            max_slots: 256,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            num_pointers: Some(256),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            num_pointers: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config = ServerConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
