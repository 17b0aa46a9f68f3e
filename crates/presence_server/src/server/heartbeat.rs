//! Per-connection heartbeat task.
//!
//! Each admitted connection gets its own periodic task that queues
//! `[1, identity, now]` on the connection's outbound queue. Clients echo the
//! frame back and the round trip becomes the connection's latency.

use crate::clock::Clock;
use crate::connection::{ConnectionId, Outbound};
use crate::messaging::Heartbeat;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

/// Spawns the heartbeat for one connection. The first beat goes out
/// immediately.
///
/// The returned handle belongs in the registry record so removal cancels the
/// task. The task also stops on its own once the outbound queue is closed.
pub fn spawn_heartbeat(
    connection_id: ConnectionId,
    identity: u8,
    outbound: Outbound,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if outbound.is_closed() {
                break;
            }

            let frame = Heartbeat::new(identity, clock.now_millis()).encode();
            if !outbound.try_send(Message::binary(frame.to_vec())) {
                trace!("Heartbeat for connection {} skipped", connection_id);
            }
        }

        trace!("Heartbeat for connection {} stopped", connection_id);
    })
}
