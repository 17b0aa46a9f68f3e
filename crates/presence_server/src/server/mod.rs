//! Relay server: listeners, per-connection handling and background tasks.

pub mod core;
pub mod handlers;
pub mod heartbeat;
pub mod reaper;

pub use self::core::RelayServer;
pub use heartbeat::spawn_heartbeat;
pub use reaper::{run_sweep, spawn_idle_reaper, SweepReport};
