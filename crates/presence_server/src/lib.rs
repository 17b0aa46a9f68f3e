//! # Presence Server - Real-Time Presence Relay
//!
//! A WebSocket relay for shared multiuser experiences. Every connected browser
//! gets a small integer identity, sees who else is present through compact
//! binary roster snapshots, and has its pointer and drawing events relayed to
//! everyone else. The relay measures each client's latency with heartbeats and
//! evicts clients that stay silent for too long.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Slot pools** - Bounded first-free identity allocators ([`connection::slots`])
//! * **Connection registry** - The live set, admission and removal ([`ConnectionManager`])
//! * **Wire codec** - Fixed-layout binary frames ([`messaging::codec`], [`messaging::roster`])
//! * **Router** - Per-frame dispatch by tag ([`messaging::router`])
//! * **Heartbeat and idle reaper** - Liveness tasks ([`server::heartbeat`], [`server::reaper`])
//! * **Relay server** - Listeners, accept loops and shutdown ([`RelayServer`])
//!
//! ### Message Flow
//!
//! 1. A client connects; the handshake yields its forwarded address and the
//!    `observer` query flag
//! 2. The registry assigns a slot (and a pointer index for participants)
//! 3. Everyone receives a fresh roster frame
//! 4. Motion frames are restamped with the sender's identity and relayed to
//!    every other client; nickname changes trigger a roster broadcast
//! 5. On close or idle eviction the identities are released and the roster
//!    goes out again
//!
//! ## Wire Format
//!
//! Every frame is binary and starts with a one-byte tag:
//!
//! | Tag | Meaning   | Layout |
//! |-----|-----------|--------|
//! | 0   | roster    | `[0]` then 17 bytes per client |
//! | 1   | heartbeat | `[1, identity, u64 BE millis]` |
//! | 2   | nickname  | `[2, _, utf-8 ...]` |
//! | 3   | motion    | `[3, identity, payload ...]` |
//!
//! ## Thread Safety
//!
//! The registry sits behind a single `tokio::sync::RwLock`. Admission and
//! removal take the write lock once; broadcasts take the read lock and only
//! ever `try_send` into bounded per-client queues, so a slow client never
//! stalls the others.
//!
//! ## Error Handling
//!
//! [`ServerError`] covers what callers can observe: network and bind
//! failures, exhausted identity pools and invalid configuration. Malformed
//! frames and unwritable clients are skipped and logged, never surfaced.

// Re-export core types and functions for easy access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServerConfig, DEFAULT_NUM_POINTERS, MAX_SLOTS};
pub use connection::{ConnectionId, ConnectionManager, ConnectionSnapshot};
pub use error::ServerError;
pub use server::RelayServer;
pub use utils::{create_server, create_server_with_config};

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod utils;
