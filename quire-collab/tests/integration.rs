//! Integration tests for end-to-end WebSocket synchronization.
//!
//! These tests start a real server and connect real clients,
//! verifying the full sync pipeline over the wire.

use futures_util::{SinkExt, Stream, StreamExt};
use quire_collab::client::{ConnectionState, SyncClient, SyncEvent};
use quire_collab::patch::PatchEngine;
use quire_collab::protocol::{MessageType, SyncMessage};
use quire_collab::server::{ServerConfig, SyncServer};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server() -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        max_frame_bytes: 1024 * 1024,
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect a client to `room` and drain its Connected and initial Synced
/// events.
async fn connect_client(
    room: &str,
    url: &str,
) -> (SyncClient, tokio::sync::mpsc::Receiver<SyncEvent>) {
    let mut client = SyncClient::new(room, url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();

    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(SyncEvent::Connected)) => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(SyncEvent::Synced(_))) => {}
        other => panic!("expected initial Synced, got {other:?}"),
    }
    (client, events)
}

/// Read frames off a raw WebSocket until the next Sync message.
async fn next_sync(
    stream: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> SyncMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Binary(data) = msg {
            let bytes: Vec<u8> = data.into();
            let decoded = SyncMessage::decode(&bytes).unwrap();
            if decoded.msg_type == MessageType::Sync {
                return decoded;
            }
        }
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_join_reply_carries_current_text() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client_a, _events_a) = connect_client("doc1", &url).await;
    client_a.edit("hello").await.unwrap();
    // Let the patch reach the store before the second join.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client_b = SyncClient::new("doc1", &url);
    let mut events_b = client_b.take_event_rx().unwrap();
    client_b.connect().await.unwrap();

    match timeout(Duration::from_secs(2), events_b.recv()).await {
        Ok(Some(SyncEvent::Connected)) => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match timeout(Duration::from_secs(2), events_b.recv()).await {
        Ok(Some(SyncEvent::Synced(text))) => assert_eq!(text, "hello"),
        other => panic!("expected Synced, got {other:?}"),
    }

    assert_eq!(client_b.connection_state().await, ConnectionState::Connected);
    assert_eq!(client_b.text().await, "hello");
}

#[tokio::test]
async fn test_patch_propagates_and_skips_sender() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client_a, mut events_a) = connect_client("doc1", &url).await;
    let (client_b, mut events_b) = connect_client("doc1", &url).await;

    client_a.edit("hello").await.unwrap();

    // The other member applies the patch to its shadow.
    match timeout(Duration::from_secs(2), events_b.recv()).await {
        Ok(Some(SyncEvent::RemoteUpdate(text))) => assert_eq!(text, "hello"),
        other => panic!("expected RemoteUpdate, got {other:?}"),
    }
    assert_eq!(client_b.text().await, "hello");

    // The sender gets no echo of its own patch.
    let echo = timeout(Duration::from_millis(200), events_a.recv()).await;
    assert!(echo.is_err(), "sender must not receive its own patch, got {echo:?}");
    assert_eq!(client_a.text().await, "hello");
}

#[tokio::test]
async fn test_conflict_forces_room_wide_resync() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client_a, mut events_a) = connect_client("doc1", &url).await;
    client_a.edit("hello world").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A raw connection joins, then submits a patch built against a base the
    // document never resembled, so every hunk fails.
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut sink, mut stream) = ws.split();

    let join = SyncMessage::join(Uuid::new_v4(), "doc1");
    sink.send(Message::Binary(join.encode().unwrap().into()))
        .await
        .unwrap();
    let reply = next_sync(&mut stream).await;
    assert_eq!(reply.payload, "hello world");

    let stale = PatchEngine::new()
        .diff(
            "Jackdaws love my big sphinx of quartz, as the stale base had it.",
            "A fully rewritten line retaining nothing of the stale wording.",
        )
        .unwrap();
    let patch = SyncMessage::patch(Uuid::new_v4(), "doc1", stale);
    sink.send(Message::Binary(patch.encode().unwrap().into()))
        .await
        .unwrap();

    // The rejected sender itself receives the room-wide canonical sync.
    let resync = next_sync(&mut stream).await;
    assert!(resync.is_server_originated());
    assert_eq!(resync.payload, "hello world");

    // So does the other member, replacing its shadow wholesale.
    match timeout(Duration::from_secs(2), events_a.recv()).await {
        Ok(Some(SyncEvent::Synced(text))) => assert_eq!(text, "hello world"),
        other => panic!("expected Synced, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rooms_do_not_leak_across_the_wire() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client_a, _events_a) = connect_client("room-a", &url).await;
    let (client_b, mut events_b) = connect_client("room-b", &url).await;

    client_a.edit("only for room a").await.unwrap();

    let leak = timeout(Duration::from_millis(200), events_b.recv()).await;
    assert!(leak.is_err(), "room-b must not see room-a traffic, got {leak:?}");
    assert_eq!(client_b.text().await, "");
}
