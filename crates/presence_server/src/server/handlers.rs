//! Per-connection WebSocket handling.
//!
//! Each accepted TCP stream runs [`handle_connection`] in its own task. After
//! admission the connection is served by three tasks: the read loop (this
//! task), a writer draining the outbound queue into the socket, and the
//! heartbeat.

use crate::config::ServerConfig;
use crate::connection::{AdmissionRequest, ConnectionId, ConnectionManager, Outbound};
use crate::error::ServerError;
use crate::messaging::route_client_frame;
use crate::server::heartbeat::spawn_heartbeat;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, trace, warn};

/// Outgoing half of a client WebSocket.
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Handles a single client from handshake to removal.
///
/// # Connection Lifecycle
///
/// 1. WebSocket handshake, capturing `X-Forwarded-For` and the observer flag
/// 2. Admission; if a pool is full the socket is dropped without a frame
/// 3. Writer and heartbeat tasks start, the roster goes out to everyone
/// 4. Binary frames are routed until the client leaves, the transport fails,
///    or the reaper asks the connection to terminate
/// 5. Removal releases the connection's identities and the remaining clients
///    get a fresh roster
///
/// # Returns
///
/// `Err` only when the handshake fails; everything after admission is
/// handled and logged here.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_manager: Arc<ConnectionManager>,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let mut admission_request = None;
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            admission_request = Some(AdmissionRequest::from_handshake(request, addr));
            Ok(response)
        },
    )
    .await
    .map_err(|e| ServerError::Network(format!("WebSocket handshake failed for {addr}: {e}")))?;

    let request = admission_request.unwrap_or_else(|| AdmissionRequest::new(addr));
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound, receiver) = Outbound::channel(config.outbound_queue_capacity);
    let connection_id = connection_manager.next_connection_id();

    let admission = match connection_manager
        .admit(connection_id, &request, outbound.clone())
        .await
    {
        Ok(admission) => admission,
        Err(e) => {
            warn!("🚫 Rejecting connection from {}: {}", addr, e);
            return Ok(());
        }
    };

    let (frames, terminate) = receiver.into_parts();
    let writer = tokio::spawn(write_frames(ws_sender, frames, connection_id));

    let heartbeat = spawn_heartbeat(
        connection_id,
        admission.identity,
        outbound,
        connection_manager.clock(),
        Duration::from_millis(config.heartbeat_interval_ms),
    );
    connection_manager.attach_heartbeat(connection_id, heartbeat).await;

    info!(
        "👋 Connection {} joined as {} from {}{}",
        connection_id,
        admission.identity,
        admission.remote_address,
        if request.observer { " (observer)" } else { "" }
    );
    info!("USERS: {}", connection_manager.connection_count());
    connection_manager.broadcast_roster(None).await;

    loop {
        tokio::select! {
            _ = terminate.notified() => {
                debug!("Connection {} terminated by the server", connection_id);
                break;
            }
            message = ws_receiver.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let outcome = route_client_frame(data.to_vec(), connection_id, &connection_manager).await;
                    trace!("Connection {} frame: {:?}", connection_id, outcome);
                }
                Some(Ok(Message::Text(_))) => {
                    connection_manager.touch(connection_id).await;
                    debug!("Ignoring text frame from connection {}", connection_id);
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Connection {} closed by peer", connection_id);
                    break;
                }
                // Ping and pong are answered by the transport
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error on connection {}: {}", connection_id, e);
                    break;
                }
            }
        }
    }

    let removed = connection_manager.remove(connection_id).await;
    writer.abort();
    if removed {
        connection_manager.broadcast_roster(None).await;
    }

    info!(
        "👋 Connection {} ({}) left",
        connection_id, admission.remote_address
    );
    info!("USERS: {}", connection_manager.connection_count());
    Ok(())
}

/// Drains a connection's outbound queue into its socket until either side
/// goes away.
async fn write_frames(
    mut ws_sender: WsSink,
    mut frames: mpsc::Receiver<Message>,
    connection_id: ConnectionId,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = ws_sender.send(frame).await {
            debug!("Write to connection {} failed: {}", connection_id, e);
            break;
        }
    }
    let _ = ws_sender.close().await;
}
