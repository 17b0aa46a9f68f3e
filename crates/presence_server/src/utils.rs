//! Convenience constructors.

use crate::{config::ServerConfig, server::RelayServer};

/// Creates a relay server with the default configuration.
pub fn create_server() -> RelayServer {
    RelayServer::new(ServerConfig::default())
}

/// Creates a relay server with a custom configuration.
pub fn create_server_with_config(config: ServerConfig) -> RelayServer {
    RelayServer::new(config)
}
