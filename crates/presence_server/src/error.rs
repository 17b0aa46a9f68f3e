//! Error types for the presence relay.

/// Errors surfaced by the relay server.
///
/// Most per-connection failures are handled locally and only logged; these
/// variants cover the cases a caller can actually observe.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket creation, binding, handshake or transport failures
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected internal failures
    #[error("Internal error: {0}")]
    Internal(String),

    /// A bounded identity pool has no free index left
    #[error("Capacity exceeded: {pool} pool is full")]
    CapacityExceeded {
        /// Which pool ran out ("slot" or "pointer")
        pool: &'static str,
    },

    /// Invalid server configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}
