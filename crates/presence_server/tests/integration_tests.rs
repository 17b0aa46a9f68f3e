//! End-to-end tests against a relay bound to an ephemeral port.

use futures::{SinkExt, StreamExt};
use presence_server::messaging::{decode_roster, Heartbeat, MessageTag};
use presence_server::{RelayServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(250);

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        // Keep periodic traffic out of the way; the first heartbeat is still
        // sent on admission
        heartbeat_interval_ms: 60_000,
        sweep_interval_ms: 60_000,
        ..Default::default()
    }
}

async fn start_relay(config: ServerConfig) -> (Arc<RelayServer>, SocketAddr) {
    let server = Arc::new(RelayServer::new(config));
    let listeners = server.bind().expect("bind");
    let addr = listeners[0].local_addr().unwrap();

    let running = server.clone();
    tokio::spawn(async move { running.serve(listeners).await });
    (server, addr)
}

async fn connect(addr: SocketAddr, query: &str, forwarded_for: Option<&'static str>) -> Client {
    let mut request = format!("ws://{addr}/{query}").into_client_request().unwrap();
    if let Some(value) = forwarded_for {
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static(value));
    }
    let (client, _) = connect_async(request).await.expect("connect");
    client
}

/// Next binary frame whose tag is `tag`, skipping everything else.
async fn next_tagged(client: &mut Client, tag: MessageTag) -> Vec<u8> {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Binary(data))) if data.first() == Some(&(tag as u8)) => {
                    return data.to_vec();
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for {tag:?}: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {tag:?}"))
}

/// Waits for a roster describing exactly `count` clients.
async fn roster_of(client: &mut Client, count: usize) -> Vec<u8> {
    loop {
        let frame = next_tagged(client, MessageTag::Roster).await;
        if frame.len() == 1 + 17 * count {
            return frame;
        }
    }
}

/// Asserts no frame with `tag` arrives for a short while.
async fn assert_silent(client: &mut Client, tag: MessageTag) {
    let result = tokio::time::timeout(QUIET, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Binary(data))) if data.first() == Some(&(tag as u8)) => {
                    return data.to_vec();
                }
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected {tag:?} frame: {result:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_roster_follows_membership() {
    let (_server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let roster = roster_of(&mut alice, 1).await;
    assert_eq!(roster.len(), 18);

    let mut bob = connect(addr, "", None).await;
    let roster = roster_of(&mut alice, 2).await;
    let records = decode_roster(&roster).unwrap();
    assert_eq!(records[0].identity, 0);
    assert_eq!(records[1].identity, 1);
    assert_eq!(records[0].address, u32::from_be_bytes([127, 0, 0, 1]));
    roster_of(&mut bob, 2).await;

    bob.close(None).await.unwrap();
    roster_of(&mut alice, 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_carries_identity() {
    let (_server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let mut bob = connect(addr, "", None).await;
    let mut watcher = connect(addr, "?observer", None).await;

    let beat = Heartbeat::decode(&next_tagged(&mut alice, MessageTag::Heartbeat).await).unwrap();
    assert_eq!(beat.identity, 0);
    let beat = Heartbeat::decode(&next_tagged(&mut bob, MessageTag::Heartbeat).await).unwrap();
    assert_eq!(beat.identity, 1);
    let beat = Heartbeat::decode(&next_tagged(&mut watcher, MessageTag::Heartbeat).await).unwrap();
    assert_eq!(beat.identity, 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_motion_is_restamped_for_peers_only() {
    let (_server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let mut bob = connect(addr, "", None).await;
    roster_of(&mut alice, 2).await;
    roster_of(&mut bob, 2).await;

    alice
        .send(Message::binary(vec![3u8, 77, 10, 20, 30]))
        .await
        .unwrap();
    let relayed = next_tagged(&mut bob, MessageTag::Motion).await;
    assert_eq!(relayed, vec![3, 0, 10, 20, 30]);

    assert_silent(&mut alice, MessageTag::Motion).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_observer_receives_but_does_not_relay_motion() {
    let (_server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let mut watcher = connect(addr, "?observer=1", None).await;
    roster_of(&mut alice, 2).await;
    roster_of(&mut watcher, 2).await;

    watcher.send(Message::binary(vec![3u8, 0, 1])).await.unwrap();
    assert_silent(&mut alice, MessageTag::Motion).await;

    alice.send(Message::binary(vec![3u8, 5, 9])).await.unwrap();
    assert_eq!(
        next_tagged(&mut watcher, MessageTag::Motion).await,
        vec![3, 0, 9]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nickname_reaches_roster() {
    let (_server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let mut bob = connect(addr, "", None).await;
    roster_of(&mut alice, 2).await;
    roster_of(&mut bob, 2).await;

    alice
        .send(Message::binary(b"\x02\x00alice in wonderland".to_vec()))
        .await
        .unwrap();

    let records = decode_roster(&roster_of(&mut bob, 2).await).unwrap();
    assert_eq!(records[0].nickname_lossy(), "alice in w");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forwarded_addresses_are_disambiguated() {
    let (server, addr) = start_relay(test_config()).await;

    let mut first = connect(addr, "", Some("1.2.3.4, 10.0.0.1")).await;
    roster_of(&mut first, 1).await;
    let mut second = connect(addr, "", Some("1.2.3.4")).await;

    let records = decode_roster(&roster_of(&mut second, 2).await).unwrap();
    assert_eq!(records[0].address, 0x0102_0304);
    assert_eq!(records[1].address, 0x0102_0304);

    let addresses: Vec<String> = server
        .get_connection_manager()
        .list()
        .await
        .into_iter()
        .map(|c| c.remote_address)
        .collect();
    assert_eq!(addresses, vec!["1.2.3.4", "1.2.3.4 (2)"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_echo_sets_latency() {
    let (server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    let beat = next_tagged(&mut alice, MessageTag::Heartbeat).await;
    alice.send(Message::binary(beat)).await.unwrap();

    let manager = server.get_connection_manager();
    let latency = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(latency) = manager.list().await.first().and_then(|c| c.latency_ms) {
                return latency;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("latency should be recorded");
    assert!(latency < 1000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_pool_drops_connection_without_frames() {
    let config = ServerConfig {
        max_slots: 1,
        ..test_config()
    };
    let (server, addr) = start_relay(config).await;

    let mut alice = connect(addr, "", None).await;
    roster_of(&mut alice, 1).await;

    let mut rejected = connect(addr, "", None).await;
    let outcome = tokio::time::timeout(WAIT, rejected.next())
        .await
        .expect("rejected connection should close");
    assert!(
        !matches!(outcome, Some(Ok(Message::Binary(_)))),
        "rejected connection received {outcome:?}"
    );
    assert_eq!(server.get_connection_manager().connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_disconnects_clients() {
    let (server, addr) = start_relay(test_config()).await;

    let mut alice = connect(addr, "", None).await;
    roster_of(&mut alice, 1).await;

    server.shutdown().await.unwrap();
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Binary(_))) | Some(Ok(Message::Ping(_))) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(server.get_connection_manager().connection_count(), 0);
}
