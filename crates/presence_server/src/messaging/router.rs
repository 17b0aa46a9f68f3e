//! Dispatch of inbound client frames.
//!
//! Every frame a client sends passes through [`route_client_frame`]. Whatever
//! its contents, the frame marks the sender active for the idle reaper; the
//! tag then decides what else happens.

use crate::connection::{ConnectionId, ConnectionManager};
use crate::messaging::codec::{decode_client_frame, stamp_identity};
use crate::messaging::types::ClientMessage;
use tracing::{debug, trace};

/// What routing a frame did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Unknown tag, short frame, observer write, or unknown connection
    Ignored,
    /// A heartbeat echo updated the sender's latency
    LatencyRecorded(u16),
    /// The sender's nickname changed and the roster went out to its peers
    NicknameUpdated { recipients: usize },
    /// A motion frame was restamped and relayed to peers
    MotionRelayed { recipients: usize },
}

/// Routes one binary frame from `connection_id`.
///
/// # Message Flow
///
/// 1. Mark the connection active
/// 2. Decode the tag; malformed frames stop here
/// 3. Heartbeat echo: fold the round trip into the connection's latency
/// 4. Nickname: store it (participants only) and broadcast the roster to
///    everyone else
/// 5. Motion: overwrite byte 1 with the sender's identity and relay the frame
///    to everyone else (participants only)
pub async fn route_client_frame(
    mut frame: Vec<u8>,
    connection_id: ConnectionId,
    connection_manager: &ConnectionManager,
) -> RouteOutcome {
    connection_manager.touch(connection_id).await;

    let Some(message) = decode_client_frame(&frame) else {
        debug!(
            "Ignoring malformed frame ({} bytes) from connection {}",
            frame.len(),
            connection_id
        );
        return RouteOutcome::Ignored;
    };

    match message {
        ClientMessage::Heartbeat { timestamp } => {
            match connection_manager.record_latency(connection_id, timestamp).await {
                Some(latency) => {
                    trace!("Connection {} latency {}ms", connection_id, latency);
                    RouteOutcome::LatencyRecorded(latency)
                }
                None => RouteOutcome::Ignored,
            }
        }
        ClientMessage::Nickname(nickname) => {
            if !connection_manager.set_nickname(connection_id, &nickname).await {
                debug!("Ignoring nickname from connection {}", connection_id);
                return RouteOutcome::Ignored;
            }
            let recipients = connection_manager.broadcast_roster(Some(connection_id)).await;
            debug!(
                "Connection {} is now '{}', roster sent to {} peer(s)",
                connection_id, nickname, recipients
            );
            RouteOutcome::NicknameUpdated { recipients }
        }
        ClientMessage::Motion(_) => {
            let Some(snapshot) = connection_manager.get(connection_id).await else {
                return RouteOutcome::Ignored;
            };
            if snapshot.observer {
                trace!("Dropping motion from observer {}", connection_id);
                return RouteOutcome::Ignored;
            }

            stamp_identity(&mut frame, snapshot.identity);
            let recipients = connection_manager
                .broadcast(Some(connection_id), &frame)
                .await;
            RouteOutcome::MotionRelayed { recipients }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::ServerConfig;
    use crate::connection::{Activity, AdmissionRequest, Outbound, OutboundReceiver};
    use crate::messaging::codec::Heartbeat;
    use crate::messaging::roster::decode_roster;
    use std::net::SocketAddr;
    use std::sync::Arc;

    struct Harness {
        manager: ConnectionManager,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(5_000));
            Self {
                manager: ConnectionManager::new(&ServerConfig::default(), clock.clone()),
                clock,
            }
        }

        async fn join(&self, observer: bool) -> (ConnectionId, OutboundReceiver) {
            let mut request = AdmissionRequest::new(SocketAddr::from(([127, 0, 0, 1], 9000)));
            if observer {
                request = request.as_observer();
            }
            let (outbound, receiver) = Outbound::channel(8);
            let id = self.manager.next_connection_id();
            self.manager.admit(id, &request, outbound).await.unwrap();
            (id, receiver)
        }
    }

    fn frames(receiver: &mut OutboundReceiver) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(message) = receiver.try_recv() {
            out.push(message.into_data().to_vec());
        }
        out
    }

    #[tokio::test]
    async fn test_motion_is_restamped_and_relayed() {
        let h = Harness::new();
        let (alice, mut ra) = h.join(false).await;
        let (_bob, mut rb) = h.join(false).await;
        let (_watcher, mut rw) = h.join(true).await;

        let outcome = route_client_frame(vec![3, 99, 7, 7], alice, &h.manager).await;
        assert_eq!(outcome, RouteOutcome::MotionRelayed { recipients: 2 });

        assert!(frames(&mut ra).is_empty());
        assert_eq!(frames(&mut rb), vec![vec![3, 0, 7, 7]]);
        assert_eq!(frames(&mut rw), vec![vec![3, 0, 7, 7]]);
    }

    #[tokio::test]
    async fn test_observer_motion_is_not_relayed() {
        let h = Harness::new();
        let (_alice, mut ra) = h.join(false).await;
        let (watcher, _rw) = h.join(true).await;

        let outcome = route_client_frame(vec![3, 1, 2], watcher, &h.manager).await;
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert!(frames(&mut ra).is_empty());
    }

    #[tokio::test]
    async fn test_nickname_broadcasts_roster_to_peers() {
        let h = Harness::new();
        let (alice, mut ra) = h.join(false).await;
        let (_bob, mut rb) = h.join(false).await;

        let outcome = route_client_frame(b"\x02\x00alice".to_vec(), alice, &h.manager).await;
        assert_eq!(outcome, RouteOutcome::NicknameUpdated { recipients: 1 });

        assert!(frames(&mut ra).is_empty());
        let received = frames(&mut rb);
        assert_eq!(received.len(), 1);
        let records = decode_roster(&received[0]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].nickname_lossy(), "alice");
    }

    #[tokio::test]
    async fn test_heartbeat_echo_records_latency() {
        let h = Harness::new();
        let (alice, _ra) = h.join(false).await;

        let sent = h.clock.now_millis();
        h.clock.advance(42);
        let echo = Heartbeat::new(0, sent).encode().to_vec();
        assert_eq!(
            route_client_frame(echo, alice, &h.manager).await,
            RouteOutcome::LatencyRecorded(42)
        );
        assert_eq!(h.manager.get(alice).await.unwrap().latency_ms, Some(42));
    }

    #[tokio::test]
    async fn test_malformed_frames_still_count_as_activity() {
        let h = Harness::new();
        let (alice, _ra) = h.join(false).await;
        assert!(matches!(
            h.manager.get(alice).await.unwrap().activity,
            Activity::IdleSince(_)
        ));

        for frame in [vec![], vec![9, 9], vec![0, 1], vec![1, 0, 0]] {
            assert_eq!(route_client_frame(frame, alice, &h.manager).await, RouteOutcome::Ignored);
        }
        assert_eq!(h.manager.get(alice).await.unwrap().activity, Activity::Active);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_ignored() {
        let h = Harness::new();
        assert_eq!(
            route_client_frame(vec![3, 0, 1], 777, &h.manager).await,
            RouteOutcome::Ignored
        );
    }
}
