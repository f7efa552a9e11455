//! WebSocket transport adapter with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── WebSocket ── connection task ── Coordinator
//! Client B ──┘                      │                 │
//!                                   │          ┌──────┴──────┐
//!                                   │          ▼             ▼
//!                                   │    DocumentStore  Membership
//!                                   │
//!                            RoomDirectory ── RoomGroup (fan-out)
//!                                   │
//!                        ┌──────────┼───────────┐
//!                        ▼          ▼           ▼
//!                     Client A   Client B    Client C
//! ```
//!
//! The transport owns exactly the plumbing the protocol core delegates to it:
//! accepting sockets, assigning connection identities, delivering inbound
//! events to the [`Coordinator`], and realizing its three outbound addressing
//! primitives. Send-to-one goes straight out the socket; the two room
//! broadcasts go through the room's [`RoomGroup`] channel, with one forwarder
//! task per joined room feeding a per-connection queue and dropping frames
//! the connection itself originated.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{RoomDirectory, RoomGroup};
use crate::coordinator::{Coordinator, Delivery};
use crate::membership::Membership;
use crate::protocol::{MessageType, SyncMessage};
use crate::store::DocumentStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Largest inbound frame accepted before it is logged and dropped
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub patches_applied: u64,
    pub patches_rejected: u64,
    pub patches_malformed: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
    directory: Arc<RoomDirectory>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(DocumentStore::new());
        let membership = Arc::new(Membership::new());
        let directory = Arc::new(RoomDirectory::new(config.broadcast_capacity));

        Self {
            coordinator: Arc::new(Coordinator::new(store, membership)),
            directory,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            config,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = self.coordinator.clone();
            let directory = self.directory.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, coordinator, directory, stats, config)
                        .await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        coordinator: Arc<Coordinator>,
        directory: Arc<RoomDirectory>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Connection identity is assigned here, at accept time; clients never
        // pick their own.
        let client_id = Uuid::new_v4();
        log::info!("WebSocket connection {client_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Room broadcasts funnel into one outbound queue; one forwarder task
        // per joined room moves frames from the room channel into it.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Arc<Vec<u8>>>();
        let mut forwarders: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                // Inbound WebSocket frame
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            if bytes.len() > config.max_frame_bytes {
                                log::warn!(
                                    "Dropping oversized frame ({} bytes) from {client_id}",
                                    bytes.len()
                                );
                                continue;
                            }

                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match sync_msg.msg_type {
                                MessageType::JoinRoom => {
                                    // Attach to the room's fan-out first, then
                                    // snapshot. A patch committed in between is
                                    // then delivered through the channel instead
                                    // of falling into the gap between the two.
                                    // Attached exactly once per connection;
                                    // repeat joins only refresh the sync reply.
                                    if !forwarders.contains_key(&sync_msg.room) {
                                        let group =
                                            directory.get_or_create(&sync_msg.room).await;
                                        let handle = Self::spawn_forwarder(
                                            &group, client_id, out_tx.clone(),
                                        ).await;
                                        forwarders.insert(sync_msg.room.clone(), handle);

                                        let mut s = stats.write().await;
                                        s.active_rooms = directory.room_count().await;
                                    }

                                    let delivery =
                                        coordinator.join(client_id, &sync_msg.room).await;
                                    if let Delivery::ToClient { message, .. } = delivery {
                                        let encoded = message.encode()?;
                                        ws_sender.send(Message::Binary(encoded.into())).await?;
                                    }
                                }

                                MessageType::Patch => {
                                    match coordinator
                                        .apply_patch(client_id, &sync_msg.room, &sync_msg.payload)
                                        .await
                                    {
                                        Ok(Some(delivery)) => {
                                            let group =
                                                directory.get_or_create(&sync_msg.room).await;
                                            let mut s = stats.write().await;
                                            match delivery {
                                                Delivery::ToRoomExceptSender { message } => {
                                                    s.patches_applied += 1;
                                                    drop(s);
                                                    let _ = group.broadcast(&message);
                                                }
                                                Delivery::ToRoom { message } => {
                                                    s.patches_rejected += 1;
                                                    drop(s);
                                                    let _ = group.broadcast(&message);
                                                }
                                                Delivery::ToClient { .. } => {}
                                            }
                                        }
                                        // Zero-hunk patch: nothing to apply,
                                        // nothing to broadcast.
                                        Ok(None) => {}
                                        Err(e) => {
                                            // Reported, non-fatal: no broadcast,
                                            // no document change.
                                            log::warn!(
                                                "Dropping patch from {client_id} for room {:?}: {e}",
                                                sync_msg.room
                                            );
                                            let mut s = stats.write().await;
                                            s.patches_malformed += 1;
                                        }
                                    }
                                }

                                MessageType::RequestSync => {
                                    let delivery = coordinator
                                        .request_sync(client_id, &sync_msg.room)
                                        .await;
                                    if let Delivery::ToClient { message, .. } = delivery {
                                        let encoded = message.encode()?;
                                        ws_sender.send(Message::Binary(encoded.into())).await?;
                                    }
                                }

                                MessageType::Sync => {
                                    // Sync frames only ever flow server → client.
                                    log::debug!(
                                        "Ignoring client-originated sync frame from {client_id}"
                                    );
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {client_id} closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outbound frame from one of the joined rooms
                frame = out_rx.recv() => {
                    match frame {
                        Some(data) => {
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        // Cleanup: membership first, then per-room transport resources.
        let left = coordinator.disconnect(client_id).await;
        for room in &left {
            if let Some(handle) = forwarders.remove(room) {
                handle.abort();
            }
            if let Some(group) = directory.get(room).await {
                group.leave(client_id).await;
                directory.remove_if_empty(room).await;
            }
        }
        // Forwarders for rooms the tracker no longer knows about still need
        // to die with the connection.
        for (_, handle) in forwarders {
            handle.abort();
        }

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = directory.room_count().await;
        }

        Ok(())
    }

    /// Spawn the task that moves frames from a room's broadcast channel into
    /// this connection's outbound queue, skipping frames it originated.
    async fn spawn_forwarder(
        group: &Arc<RoomGroup>,
        client_id: Uuid,
        out_tx: mpsc::UnboundedSender<Arc<Vec<u8>>>,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = group.join(client_id).await;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        // Never echo a connection's own patches back at it.
                        // Server-originated frames carry a nil id and pass.
                        if let Ok(msg) = SyncMessage::decode(&frame) {
                            if msg.client_id == client_id {
                                continue;
                            }
                        }
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Dropped frames are recovered by the client issuing
                        // RequestSync, not by the server retrying.
                        log::warn!("Connection {client_id} lagged by {n} frames");
                    }
                    Err(_) => break,
                }
            }
        })
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the protocol core.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Get the room fan-out directory.
    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }
}
