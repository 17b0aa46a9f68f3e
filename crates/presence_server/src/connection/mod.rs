//! Connection management for relay clients.
//!
//! This module handles the lifecycle of client connections: admission and
//! identity assignment, per-connection state, outbound queues and the idle
//! bookkeeping used by the reaper.

pub mod admission;
pub mod client;
pub mod latency;
pub mod manager;
pub mod slots;

pub use admission::AdmissionRequest;
pub use client::{Activity, ConnectionSnapshot, Outbound, OutboundReceiver};
pub use manager::{Admission, ConnectionManager, Eviction};

/// Type alias for connection identifiers.
///
/// Connection IDs are process-unique and never reused, unlike slots and
/// pointer indices which are recycled as clients leave.
pub type ConnectionId = usize;
