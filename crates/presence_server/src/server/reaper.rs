//! Periodic idle sweep.
//!
//! One task per server runs [`run_sweep`] on a shared timer. Each sweep evicts
//! connections that have been idle past the timeout, then rebroadcasts the
//! roster so clients converge even if an earlier roster frame was skipped.

use crate::connection::ConnectionManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// What a single sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub roster_recipients: usize,
}

/// Runs one sweep against the registry.
pub async fn run_sweep(connection_manager: &ConnectionManager, idle_timeout_ms: u64) -> SweepReport {
    let evictions = connection_manager.sweep_idle(idle_timeout_ms).await;
    for eviction in &evictions {
        info!(
            "IDLE {} ({}), connection {}",
            eviction.identity, eviction.remote_address, eviction.connection_id
        );
    }

    let roster_recipients = connection_manager.broadcast_roster(None).await;
    if !evictions.is_empty() {
        info!("USERS: {}", connection_manager.connection_count());
    }

    SweepReport {
        evicted: evictions.len(),
        roster_recipients,
    }
}

/// Starts the sweep loop. The first sweep runs one `period` after start; the
/// loop ends when `shutdown` fires.
pub fn spawn_idle_reaper(
    connection_manager: Arc<ConnectionManager>,
    period: Duration,
    idle_timeout_ms: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = run_sweep(&connection_manager, idle_timeout_ms).await;
                    debug!(
                        "Sweep evicted {} connection(s), roster sent to {}",
                        report.evicted, report.roster_recipients
                    );
                }
                _ = shutdown.recv() => {
                    debug!("Idle reaper stopping");
                    break;
                }
            }
        }
    })
}
