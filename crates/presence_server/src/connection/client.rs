//! Client connection representation and management.
//!
//! This module defines the per-connection record owned by the registry and the
//! outbound handle used to reach the connection's writer task.

use super::latency::LatencyTracker;
use super::ConnectionId;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

/// Maximum encoded nickname length in bytes.
pub const MAX_NICKNAME_BYTES: usize = 10;

/// Idle-sweep state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A frame arrived since the last sweep
    Active,
    /// Nothing has arrived since this timestamp (milliseconds)
    IdleSince(u64),
}

/// Sending side of a connection's bounded outbound queue.
///
/// Delivery never waits: a full or closed queue means the client is not
/// currently writable and the frame is dropped for that client only.
#[derive(Debug, Clone)]
pub struct Outbound {
    frames: mpsc::Sender<Message>,
    terminate: Arc<Notify>,
}

/// Receiving side of [`Outbound`], owned by the connection's tasks.
#[derive(Debug)]
pub struct OutboundReceiver {
    frames: mpsc::Receiver<Message>,
    terminate: Arc<Notify>,
}

impl Outbound {
    /// Creates a queue holding at most `capacity` pending frames.
    pub fn channel(capacity: usize) -> (Outbound, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let terminate = Arc::new(Notify::new());
        (
            Outbound {
                frames: tx,
                terminate: terminate.clone(),
            },
            OutboundReceiver {
                frames: rx,
                terminate,
            },
        )
    }

    /// Queues a frame without waiting. Returns whether it was accepted.
    pub fn try_send(&self, frame: Message) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Outbound queue full, skipping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_writable(&self) -> bool {
        !self.frames.is_closed() && self.frames.capacity() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// Asks the connection's read loop to stop and drop the transport.
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }
}

impl OutboundReceiver {
    /// Splits into the frame queue (for the writer) and the termination
    /// signal (for the read loop).
    pub fn into_parts(self) -> (mpsc::Receiver<Message>, Arc<Notify>) {
        (self.frames, self.terminate)
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.frames.try_recv().ok()
    }
}

/// Represents an admitted client connection.
///
/// Records are created by [`ConnectionManager::admit`](super::ConnectionManager::admit)
/// and never leave the registry; callers get [`ConnectionSnapshot`]s instead.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub slot: u8,
    pub pointer: Option<u8>,
    /// Byte that identifies this client in every frame the relay emits
    pub identity: u8,
    pub observer: bool,
    pub nickname: String,
    pub remote_address: String,
    pub latency: LatencyTracker,
    pub activity: Activity,
    pub connected_at: SystemTime,
    pub(crate) outbound: Outbound,
    pub(crate) heartbeat: Option<JoinHandle<()>>,
}

impl ClientConnection {
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            slot: self.slot,
            pointer: self.pointer,
            identity: self.identity,
            observer: self.observer,
            nickname: self.nickname.clone(),
            remote_address: self.remote_address.clone(),
            latency_ms: self.latency.latency_ms(),
            activity: self.activity,
        }
    }

    /// Stops the heartbeat task, if one is attached.
    pub(crate) fn cancel_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Read-only copy of a connection's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub slot: u8,
    pub pointer: Option<u8>,
    pub identity: u8,
    pub observer: bool,
    pub nickname: String,
    pub remote_address: String,
    pub latency_ms: Option<u16>,
    pub activity: Activity,
}

/// Cuts a nickname to at most [`MAX_NICKNAME_BYTES`] without splitting a
/// UTF-8 character.
pub fn truncate_nickname(nickname: &str) -> String {
    if nickname.len() <= MAX_NICKNAME_BYTES {
        return nickname.to_string();
    }

    let mut end = MAX_NICKNAME_BYTES;
    while !nickname.is_char_boundary(end) {
        end -= 1;
    }
    nickname[..end].to_string()
}
