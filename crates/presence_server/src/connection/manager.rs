//! The connection registry.
//!
//! [`ConnectionManager`] is the single owner of every [`ClientConnection`].
//! Admission and removal each run as one critical section under the write
//! lock, so a slot released by a closing connection is never handed to a new
//! one while the old record is still visible. Broadcasts only take the read
//! lock and never wait on a recipient.

use super::admission::{disambiguate_address, AdmissionRequest};
use super::client::{truncate_nickname, Activity, ClientConnection, ConnectionSnapshot, Outbound};
use super::latency::LatencyTracker;
use super::slots::SlotPool;
use super::ConnectionId;
use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::messaging::roster::{encode_roster, RosterEntry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub connection_id: ConnectionId,
    pub slot: u8,
    pub pointer: Option<u8>,
    pub identity: u8,
    pub remote_address: String,
}

/// A connection removed by the idle sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub connection_id: ConnectionId,
    pub identity: u8,
    pub remote_address: String,
}

#[derive(Debug)]
struct RegistryState {
    /// Live connections in admission order
    connections: Vec<ClientConnection>,
    slots: SlotPool,
    pointers: Option<SlotPool>,
}

impl RegistryState {
    fn position(&self, connection_id: ConnectionId) -> Option<usize> {
        self.connections.iter().position(|c| c.id == connection_id)
    }

    fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut ClientConnection> {
        self.connections.iter_mut().find(|c| c.id == connection_id)
    }

    /// Takes a record out of the live set and returns its identities to the
    /// pools.
    fn detach(&mut self, index: usize) -> ClientConnection {
        let mut connection = self.connections.remove(index);
        self.slots.release(connection.slot);
        if let (Some(pointers), Some(pointer)) = (self.pointers.as_mut(), connection.pointer) {
            pointers.release(pointer);
        }
        connection.cancel_heartbeat();
        connection
    }

    fn roster_entries(&self) -> Vec<RosterEntry> {
        self.connections
            .iter()
            .map(|c| RosterEntry {
                identity: c.identity,
                nickname: c.nickname.clone(),
                remote_address: c.remote_address.clone(),
                latency_ms: c.latency.wire_value(),
            })
            .collect()
    }

    fn fan_out(&self, origin: Option<ConnectionId>, frame: &[u8]) -> usize {
        let message = Message::binary(frame.to_vec());
        let mut delivered = 0;
        for connection in &self.connections {
            if Some(connection.id) == origin {
                continue;
            }
            if connection.outbound.try_send(message.clone()) {
                delivered += 1;
            } else {
                trace!("Skipping unwritable connection {}", connection.id);
            }
        }
        delivered
    }
}

/// Authoritative set of live connections and their identity pools.
#[derive(Debug)]
pub struct ConnectionManager {
    state: RwLock<RegistryState>,
    clock: Arc<dyn Clock>,
    num_pointers: Option<usize>,
    next_id: AtomicUsize,
    live: AtomicUsize,
}

impl ConnectionManager {
    /// Creates an empty registry sized from `config`, reading time from `clock`.
    pub fn new(config: &ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let num_pointers = config.num_pointers;
        Self {
            state: RwLock::new(RegistryState {
                connections: Vec::new(),
                slots: SlotPool::new(config.max_slots),
                pointers: num_pointers.map(SlotPool::new),
            }),
            clock,
            num_pointers,
            next_id: AtomicUsize::new(1),
            live: AtomicUsize::new(0),
        }
    }

    pub fn with_system_clock(config: &ServerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Hands out a fresh process-unique connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of live connections, for logging.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Admits a connection: resolves and de-duplicates its address, claims a
    /// slot and (for participants) a pointer index, and records its initial
    /// state.
    ///
    /// # Errors
    ///
    /// `ServerError::CapacityExceeded` when either pool is exhausted; nothing
    /// is recorded in that case.
    pub async fn admit(
        &self,
        connection_id: ConnectionId,
        request: &AdmissionRequest,
        outbound: Outbound,
    ) -> Result<Admission, ServerError> {
        let now = self.clock.now_millis();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let slot = state
            .slots
            .allocate()
            .ok_or(ServerError::CapacityExceeded { pool: "slot" })?;

        let pointer = match (state.pointers.as_mut(), request.observer) {
            (Some(pointers), false) => match pointers.allocate() {
                Some(pointer) => Some(pointer),
                None => {
                    state.slots.release(slot);
                    return Err(ServerError::CapacityExceeded { pool: "pointer" });
                }
            },
            _ => None,
        };

        let identity = match (self.num_pointers, pointer) {
            (Some(_), Some(pointer)) => pointer,
            // The pool size doubles as the "no pointer" sentinel
            (Some(num_pointers), None) => num_pointers as u8,
            (None, _) => slot,
        };

        let remote_address = disambiguate_address(
            &request.base_address(),
            state.connections.iter().map(|c| c.remote_address.as_str()),
        );

        state.connections.push(ClientConnection {
            id: connection_id,
            slot,
            pointer,
            identity,
            observer: request.observer,
            nickname: String::new(),
            remote_address: remote_address.clone(),
            latency: LatencyTracker::new(),
            activity: Activity::IdleSince(now),
            connected_at: SystemTime::now(),
            outbound,
            heartbeat: None,
        });
        self.live.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Admitted connection {} as slot {} (identity {}) from {}",
            connection_id, slot, identity, remote_address
        );

        Ok(Admission {
            connection_id,
            slot,
            pointer,
            identity,
            remote_address,
        })
    }

    /// Removes a connection and releases its slot and pointer index.
    ///
    /// Returns false if the connection was already gone, in which case nothing
    /// changes.
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some(index) = state.position(connection_id) else {
            return false;
        };

        let connection = state.detach(index);
        self.live.fetch_sub(1, Ordering::Relaxed);
        debug!(
            "Removed connection {} (slot {}) from {}",
            connection.id, connection.slot, connection.remote_address
        );
        true
    }

    /// Snapshot of live connections in admission order.
    pub async fn list(&self) -> Vec<ConnectionSnapshot> {
        let state = self.state.read().await;
        state.connections.iter().map(ClientConnection::snapshot).collect()
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionSnapshot> {
        let state = self.state.read().await;
        state
            .connections
            .iter()
            .find(|c| c.id == connection_id)
            .map(ClientConnection::snapshot)
    }

    pub async fn identity_of(&self, connection_id: ConnectionId) -> Option<u8> {
        self.get(connection_id).await.map(|c| c.identity)
    }

    pub async fn is_observer(&self, connection_id: ConnectionId) -> Option<bool> {
        self.get(connection_id).await.map(|c| c.observer)
    }

    /// Marks a connection as active since the last sweep.
    pub async fn touch(&self, connection_id: ConnectionId) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.get_mut(connection_id) {
            connection.activity = Activity::Active;
        }
    }

    /// Stores a nickname for a participant.
    ///
    /// Returns false for observers and unknown connections, whose requests are
    /// ignored.
    pub async fn set_nickname(&self, connection_id: ConnectionId, nickname: &str) -> bool {
        let mut state = self.state.write().await;
        match state.get_mut(connection_id) {
            Some(connection) if !connection.observer => {
                connection.nickname = truncate_nickname(nickname);
                true
            }
            _ => false,
        }
    }

    /// Folds an echoed heartbeat timestamp into the connection's latency.
    pub async fn record_latency(&self, connection_id: ConnectionId, echoed: u64) -> Option<u16> {
        let now = self.clock.now_millis();
        let mut state = self.state.write().await;
        state
            .get_mut(connection_id)
            .map(|connection| connection.latency.record(now, echoed))
    }

    /// Hands ownership of a connection's heartbeat task to the registry so it
    /// is cancelled together with the record. If the connection is already
    /// gone the task is cancelled immediately.
    pub async fn attach_heartbeat(&self, connection_id: ConnectionId, handle: JoinHandle<()>) {
        let mut state = self.state.write().await;
        match state.get_mut(connection_id) {
            Some(connection) => {
                connection.cancel_heartbeat();
                connection.heartbeat = Some(handle);
            }
            None => handle.abort(),
        }
    }

    /// Encodes the current roster, or `None` when nobody is connected.
    pub async fn roster_frame(&self) -> Option<Vec<u8>> {
        let state = self.state.read().await;
        encode_roster(&state.roster_entries())
    }

    /// Delivers `frame` to every live connection except `origin`.
    ///
    /// Each recipient gets a non-blocking enqueue; full or closed queues are
    /// skipped. Returns how many recipients accepted the frame.
    pub async fn broadcast(&self, origin: Option<ConnectionId>, frame: &[u8]) -> usize {
        let state = self.state.read().await;
        state.fan_out(origin, frame)
    }

    /// Builds the roster and broadcasts it under one read lock, so the
    /// snapshot and the recipient set agree. Nothing is sent when the registry
    /// is empty.
    pub async fn broadcast_roster(&self, origin: Option<ConnectionId>) -> usize {
        let state = self.state.read().await;
        match encode_roster(&state.roster_entries()) {
            Some(frame) => state.fan_out(origin, &frame),
            None => 0,
        }
    }

    /// Runs one idle sweep.
    ///
    /// Connections that were active since the last sweep start a fresh idle
    /// window at `now`. Connections idle since before `now - idle_timeout_ms`
    /// are removed (releasing their identities) and told to terminate.
    pub async fn sweep_idle(&self, idle_timeout_ms: u64) -> Vec<Eviction> {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(idle_timeout_ms);
        let mut state = self.state.write().await;
        let mut evicted = Vec::new();

        let mut index = 0;
        while index < state.connections.len() {
            match state.connections[index].activity {
                Activity::Active => {
                    state.connections[index].activity = Activity::IdleSince(now);
                    index += 1;
                }
                Activity::IdleSince(since) if since < cutoff => {
                    let connection = state.detach(index);
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    connection.outbound.terminate();
                    evicted.push(Eviction {
                        connection_id: connection.id,
                        identity: connection.identity,
                        remote_address: connection.remote_address,
                    });
                }
                Activity::IdleSince(_) => index += 1,
            }
        }

        evicted
    }

    /// Occupied slot count.
    pub async fn slots_in_use(&self) -> usize {
        self.state.read().await.slots.occupied()
    }

    /// Occupied pointer count, or `None` when the pointer pool is disabled.
    pub async fn pointers_in_use(&self) -> Option<usize> {
        self.state.read().await.pointers.as_ref().map(SlotPool::occupied)
    }

    /// Terminates and forgets every live connection.
    pub async fn shutdown_all(&self) {
        let mut state = self.state.write().await;
        let count = state.connections.len();
        while !state.connections.is_empty() {
            let connection = state.detach(0);
            connection.outbound.terminate();
        }
        self.live.store(0, Ordering::Relaxed);
        if count > 0 {
            info!("Closed {} connection(s) during shutdown", count);
        }
    }
}
