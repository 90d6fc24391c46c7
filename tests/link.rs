//! End-to-end tests between a registry and its peers over loopback TCP

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use remote_link::config::NetworkConfig;
use remote_link::core::frame::{encode, MessageType};
use remote_link::protocol::{CLIENT_DISCONNECTING, SERVER_EXITING};
use remote_link::{Connection, DisconnectReason, Event, Message, Peer, Registry, SerdeCodec};
use serde::{Deserialize, Serialize};
use serial_test::serial;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Command {
    Move { x: i32, y: i32 },
    Say(String),
}

type Codec = SerdeCodec<Command>;
type Events = UnboundedReceiver<Event<Command>>;

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn local_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|config| {
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;
    })
}

async fn start_registry(config: &NetworkConfig) -> (Registry<Codec>, Events, u16) {
    let registry = Registry::with_config(Codec::default(), config);
    let (_id, events) = registry.events().subscribe_channel().unwrap();
    let addr = registry.start().await.unwrap();
    (registry, events, addr.port())
}

async fn connect_peer(port: u16) -> (Peer<Codec>, Events) {
    let peer = Peer::new(Codec::default());
    let (_id, events) = peer.events().subscribe_channel().unwrap();
    peer.connect_to("127.0.0.1", port).await.unwrap();
    (peer, events)
}

async fn next_event(events: &mut Events) -> Event<Command> {
    timeout(EVENT_WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_added(events: &mut Events) -> Arc<Connection> {
    loop {
        if let Event::ClientAdded(connection) = next_event(events).await {
            return connection;
        }
    }
}

async fn next_message(events: &mut Events) -> Message<Command> {
    loop {
        if let Event::MessageReceived { message, .. } = next_event(events).await {
            return message;
        }
    }
}

async fn next_removed(events: &mut Events) -> DisconnectReason {
    loop {
        if let Event::ClientRemoved { reason, .. } = next_event(events).await {
            return reason;
        }
    }
}

async fn next_disconnected(events: &mut Events) -> DisconnectReason {
    loop {
        if let Event::Disconnected { reason, .. } = next_event(events).await {
            return reason;
        }
    }
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_peer_messages_arrive_in_order() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    assert!(peer.send_text("hello").await);
    assert!(peer.send_bytes(&[1, 2, 3]).await);
    assert!(peer.send_object(&Command::Move { x: 3, y: -4 }).await);
    assert!(peer.send(&Message::Object(Command::Say("hi".into()))).await);

    assert_eq!(next_message(&mut events).await, Message::Text("hello".into()));
    assert_eq!(
        next_message(&mut events).await,
        Message::Bytes(Bytes::from_static(&[1, 2, 3]))
    );
    assert_eq!(
        next_message(&mut events).await,
        Message::Object(Command::Move { x: 3, y: -4 })
    );
    assert_eq!(
        next_message(&mut events).await,
        Message::Object(Command::Say("hi".into()))
    );

    registry.dispose().await;
}

#[tokio::test]
async fn test_notify_single_client() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (_peer, mut peer_events) = connect_peer(port).await;
    let connection = next_added(&mut events).await;

    assert!(registry.notify_client_text(&connection, "just you").await);
    assert!(registry.notify_client_object(&connection, &Command::Say("x".into())).await);
    assert!(registry.notify_client(&connection, &Message::from(vec![7u8])).await);

    assert_eq!(next_message(&mut peer_events).await, Message::Text("just you".into()));
    assert_eq!(
        next_message(&mut peer_events).await,
        Message::Object(Command::Say("x".into()))
    );
    assert_eq!(
        next_message(&mut peer_events).await,
        Message::Bytes(Bytes::from_static(&[7]))
    );

    registry.dispose().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_client_once() {
    const PEERS: usize = 5;
    let (registry, mut events, port) = start_registry(&local_config()).await;

    let mut peers = Vec::new();
    for _ in 0..PEERS {
        peers.push(connect_peer(port).await);
    }
    for _ in 0..PEERS {
        next_added(&mut events).await;
    }
    assert_eq!(registry.client_count().await, PEERS);

    let delivered = registry
        .notify_clients_object(&Command::Move { x: 1, y: 1 })
        .await;
    assert_eq!(delivered, PEERS);

    for (_peer, peer_events) in &mut peers {
        assert_eq!(
            next_message(peer_events).await,
            Message::Object(Command::Move { x: 1, y: 1 })
        );
    }

    // Nothing else was queued for anyone
    tokio::time::sleep(Duration::from_millis(50)).await;
    for (_peer, peer_events) in &mut peers {
        assert!(peer_events.try_recv().is_err());
    }

    registry.dispose().await;
}

#[tokio::test]
async fn test_client_done_removes_exactly_once() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    peer.close().await;
    peer.close().await;

    assert_eq!(
        next_message(&mut events).await,
        Message::Text(CLIENT_DISCONNECTING.into())
    );
    assert_eq!(
        next_removed(&mut events).await,
        DisconnectReason::Sentinel(CLIENT_DISCONNECTING.into())
    );
    assert_eq!(registry.client_count().await, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, Event::ClientRemoved { .. }),
            "second ClientRemoved raised"
        );
    }

    registry.dispose().await;
}

#[tokio::test]
async fn test_sends_after_close_fail_without_io() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    peer.close().await;
    let sent_before = peer.metrics().snapshot().frames_sent;

    assert!(!peer.is_connected());
    assert!(!peer.send_text("late").await);
    assert!(!peer.send_bytes(b"late").await);
    assert!(!peer.send_object(&Command::Say("late".into())).await);
    assert!(!peer.send_raw(b"late").await);
    assert_eq!(peer.metrics().snapshot().frames_sent, sent_before);
    assert_eq!(peer.metrics().snapshot().send_failures, 0);

    registry.dispose().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_is_reported() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    let connection = next_added(&mut events).await;

    drop(peer);

    assert_eq!(next_removed(&mut events).await, DisconnectReason::PeerClosed);
    assert!(!connection.is_connected());
    assert!(!registry.notify_client_text(&connection, "gone").await);

    registry.dispose().await;
}

#[tokio::test]
async fn test_dispose_tells_peers_and_closes_them() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, mut peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    registry.dispose().await;

    assert_eq!(
        next_message(&mut peer_events).await,
        Message::Text(SERVER_EXITING.into())
    );
    assert_eq!(
        next_disconnected(&mut peer_events).await,
        DisconnectReason::Sentinel(SERVER_EXITING.into())
    );
    assert!(!peer.is_connected());
    assert!(!peer.send_text("anyone?").await);

    assert!(matches!(
        next_removed(&mut events).await,
        DisconnectReason::Closed | DisconnectReason::PeerClosed
    ));
    assert_eq!(registry.client_count().await, 0);
    registry.wait().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_dispose() {
    let (registry, _events, _port) = start_registry(&local_config()).await;
    registry.dispose().await;
    assert!(registry.is_disposed());

    let addr = registry.start().await.unwrap();
    assert!(!registry.is_disposed());
    let (_peer, _peer_events) = connect_peer(addr.port()).await;

    registry.dispose().await;
}

#[tokio::test]
async fn test_empty_frames_are_not_dispatched() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    assert!(peer.send_bytes(&[]).await);
    assert!(peer.send_text("").await);
    assert!(peer.send_text("after").await);

    assert_eq!(next_message(&mut events).await, Message::Text("after".into()));

    registry.dispose().await;
}

#[tokio::test]
async fn test_undecodable_frames_do_not_stop_the_reader() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    assert!(peer.send_raw(&encode(MessageType::Object, &[0xFF]).unwrap()).await);
    assert!(peer.send_raw(&[9, 1, 0, 0, 0, 0]).await);
    assert!(peer.send_text("still here").await);

    let mut failures = 0;
    loop {
        match next_event(&mut events).await {
            Event::DecodeFailed { .. } => failures += 1,
            Event::MessageReceived { message, .. } => {
                assert_eq!(message, Message::Text("still here".into()));
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(failures, 2);
    assert_eq!(registry.metrics().snapshot().decode_failures, 2);

    registry.dispose().await;
}

#[tokio::test]
async fn test_raw_mode_passes_bytes_through() {
    let mut config = local_config();
    config.transport.raw_mode = true;
    let (registry, mut events, port) = start_registry(&config).await;
    let (peer, _peer_events) = connect_peer(port).await;
    let connection = next_added(&mut events).await;
    assert!(connection.raw_mode());

    assert!(peer.send_raw(b"GET / HTTP/1.0\r\n\r\n").await);

    let mut received = Vec::new();
    while received.len() < 18 {
        match next_event(&mut events).await {
            Event::RawMessage { data, .. } => received.extend_from_slice(&data),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(received, b"GET / HTTP/1.0\r\n\r\n");

    registry.dispose().await;
}

#[tokio::test]
async fn test_raw_mode_switch_on_live_connection() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, _peer_events) = connect_peer(port).await;
    let connection = next_added(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    connection.set_raw_mode(true);
    assert!(peer.send_raw(b"GET / HTTP/1.0\r\n\r\n").await);

    let mut received = Vec::new();
    while received.len() < 18 {
        match next_event(&mut events).await {
            Event::RawMessage { data, .. } => received.extend_from_slice(&data),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(received, b"GET / HTTP/1.0\r\n\r\n");
    assert!(connection.is_connected());

    registry.dispose().await;
}

#[tokio::test]
async fn test_peer_raw_mode_switch_while_reading() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, mut peer_events) = connect_peer(port).await;
    let connection = next_added(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    peer.set_raw_mode(true);
    assert!(registry.raw_notify_client(&connection, b"\xFF\xFF\xFF\xFF\xFF").await);

    let mut received = Vec::new();
    while received.len() < 5 {
        match next_event(&mut peer_events).await {
            Event::RawMessage { data, .. } => received.extend_from_slice(&data),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(received, vec![0xFF; 5]);
    assert!(peer.is_connected());

    registry.dispose().await;
}

#[tokio::test]
async fn test_oversized_frame_is_refused_locally() {
    let mut config = local_config();
    config.transport.max_frame_size = 16;
    let (registry, mut events, port) = start_registry(&config).await;
    let peer = Peer::with_config(Codec::default(), &config);
    peer.connect_to("127.0.0.1", port).await.unwrap();
    let connection = next_added(&mut events).await;

    assert!(!peer.send_bytes(&[0u8; 17]).await);
    assert!(!registry.notify_client_bytes(&connection, &[0u8; 17]).await);
    assert!(peer.send_bytes(&[0u8; 16]).await);

    registry.dispose().await;
}

#[tokio::test]
async fn test_oversized_frame_from_remote_ends_the_connection() {
    let mut config = local_config();
    config.transport.max_frame_size = 16;
    let (registry, mut events, port) = start_registry(&config).await;
    let (peer, _peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    assert!(peer.send_bytes(&[0u8; 64]).await);
    assert!(matches!(
        next_removed(&mut events).await,
        DisconnectReason::Protocol(_)
    ));

    registry.dispose().await;
}

#[tokio::test]
#[serial]
async fn test_wait_for_server_gives_up_on_time() {
    let port = unused_port().await;
    let started = Instant::now();

    let peer = Peer::wait_for_server(
        "127.0.0.1",
        port,
        Some(Duration::from_millis(500)),
        Codec::default(),
    )
    .await;

    let elapsed = started.elapsed();
    assert!(!peer.is_connected());
    assert!(elapsed >= Duration::from_millis(450), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "gave up late: {elapsed:?}");
}

#[tokio::test]
#[serial]
async fn test_wait_for_server_connects_once_listening() {
    let port = unused_port().await;
    let config = NetworkConfig::default_with_overrides(|config| {
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = port;
    });

    let registry = Registry::with_config(Codec::default(), &config);
    let starter = registry.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        starter.start().await.unwrap();
    });

    let peer = Peer::wait_for_server(
        "127.0.0.1",
        port,
        Some(Duration::from_secs(5)),
        Codec::default(),
    )
    .await;
    assert!(peer.is_connected());

    registry.dispose().await;
}

#[tokio::test]
async fn test_connect_without_listener_fails() {
    let port = unused_port().await;
    assert!(Peer::connect("127.0.0.1", port, Codec::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_peer_reconnects_after_server_restart() {
    let (registry, mut events, port) = start_registry(&local_config()).await;
    let (peer, mut peer_events) = connect_peer(port).await;
    next_added(&mut events).await;

    registry.dispose().await;
    next_disconnected(&mut peer_events).await;

    let config = NetworkConfig::default_with_overrides(|config| {
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = port;
    });
    let (second, mut second_events, _) = start_registry(&config).await;

    assert!(peer.wait_for("127.0.0.1", port, Some(Duration::from_secs(5))).await);
    next_added(&mut second_events).await;
    assert!(peer.send_text("back").await);
    assert_eq!(next_message(&mut second_events).await, Message::Text("back".into()));

    second.dispose().await;
}
