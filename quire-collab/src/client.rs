//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - A local shadow of the room's document text
//! - Patch send on edit, all-or-nothing patch receive
//! - Automatic full-resync fallback when a remote patch does not apply
//! - Offline queue for edits made while disconnected
//!
//! The client never keeps a half-applied text: a remote patch with any
//! failed hunk leaves the shadow untouched and a `RequestSync` goes out
//! instead, so the next authoritative text replaces the shadow wholesale.

use std::collections::VecDeque;
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::patch::PatchEngine;
use crate::protocol::{MessageType, ProtocolError, SyncMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Full document text received; the shadow was replaced
    Synced(String),
    /// A remote patch applied cleanly; the shadow advanced
    RemoteUpdate(String),
    /// A remote patch failed to apply; a full resync was requested
    ResyncRequested,
}

/// Offline queue for edits made while disconnected.
///
/// Queued patch texts are replayed in order on reconnection; patches that no
/// longer apply server-side come back as a room-wide resync.
pub struct OfflineQueue {
    queue: VecDeque<String>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue patch text for later replay. Returns false when full.
    pub fn enqueue(&mut self, patch_text: String) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(patch_text);
        true
    }

    /// Drain all queued patches for replay, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    /// Number of queued patches.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Clear all queued patches.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The sync client: one instance per (connection, room).
pub struct SyncClient {
    /// Local frame tag; the server assigns its own connection identity
    local_id: Uuid,

    /// Room this client edits
    room: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Local shadow of the room's document text
    shadow: Arc<RwLock<String>>,

    /// Patch engine shared with the reader task
    engine: Arc<PatchEngine>,

    /// Offline queue for disconnected edits
    offline_queue: Arc<Mutex<OfflineQueue>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by connection tasks)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Server URL
    server_url: String,
}

impl SyncClient {
    /// Create a new sync client for one room.
    pub fn new(room: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            local_id: Uuid::new_v4(),
            room: room.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            shadow: Arc::new(RwLock::new(String::new())),
            engine: Arc::new(PatchEngine::new()),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(10_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        let (ws_writer, mut ws_reader) = match ws_result {
            Ok((ws_stream, _)) => ws_stream.split(),
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        // Writer task: forward the outgoing channel to the WebSocket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx.clone());
        let mut writer = ws_writer;
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                use futures_util::SinkExt;
                if writer
                    .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Join the room; the reply is a full sync of its current text.
        let join = SyncMessage::join(self.local_id, &self.room);
        let encoded = join.encode()?;
        let _ = out_tx.send(encoded).await;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Replay offline queue
        {
            let mut queue = self.offline_queue.lock().await;
            let queued = queue.drain();
            if !queued.is_empty() {
                log::info!("Replaying {} queued patches", queued.len());
                for patch_text in queued {
                    let msg = SyncMessage::patch(self.local_id, &self.room, patch_text);
                    if let Ok(encoded) = msg.encode() {
                        let _ = out_tx.send(encoded).await;
                    }
                }
            }
        }

        // Reader task: process incoming frames against the shadow.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let shadow = self.shadow.clone();
        let engine = self.engine.clone();
        let local_id = self.local_id;
        let room = self.room.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let Ok(sync_msg) = SyncMessage::decode(&bytes) else {
                            continue;
                        };
                        if sync_msg.room != room {
                            continue;
                        }

                        match sync_msg.msg_type {
                            MessageType::Sync => {
                                // Authoritative text replaces the shadow wholesale.
                                *shadow.write().await = sync_msg.payload.clone();
                                let _ = event_tx.send(SyncEvent::Synced(sync_msg.payload)).await;
                            }
                            MessageType::Patch => {
                                let current = shadow.read().await.clone();
                                match Self::apply_remote(&engine, &current, &sync_msg.payload) {
                                    Some(new_text) => {
                                        *shadow.write().await = new_text.clone();
                                        let _ = event_tx
                                            .send(SyncEvent::RemoteUpdate(new_text))
                                            .await;
                                    }
                                    None => {
                                        // Never keep a half-applied text: fall
                                        // back to a full resync.
                                        log::warn!(
                                            "Remote patch failed against shadow, requesting resync"
                                        );
                                        let req = SyncMessage::request_sync(local_id, &room);
                                        if let Ok(encoded) = req.encode() {
                                            let _ = out_tx.send(encoded).await;
                                        }
                                        let _ =
                                            event_tx.send(SyncEvent::ResyncRequested).await;
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                        break;
                    }
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Apply a remote patch all-or-nothing against a shadow text.
    ///
    /// Returns the new text only when every hunk applied.
    fn apply_remote(engine: &PatchEngine, current: &str, patch_text: &str) -> Option<String> {
        let patches = engine.decode(patch_text).ok()?;
        let (new_text, results) = engine.apply(&patches, current).ok()?;
        if results.iter().all(|&ok| ok) {
            Some(new_text)
        } else {
            None
        }
    }

    /// Replace the local text with `new_text`, sending the edit as a patch.
    ///
    /// The shadow advances immediately; the sender holds the post-patch
    /// state by construction. If disconnected, the patch is queued for
    /// replay.
    pub async fn edit(&self, new_text: &str) -> Result<(), ProtocolError> {
        let patch_text = {
            let mut shadow = self.shadow.write().await;
            let patch_text = self
                .engine
                .diff(&shadow, new_text)
                .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
            *shadow = new_text.to_string();
            patch_text
        };

        if patch_text.is_empty() {
            return Ok(()); // No change
        }

        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(patch_text) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        let msg = SyncMessage::patch(self.local_id, &self.room, patch_text);
        let encoded = msg.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Ask the server for the full current document text.
    pub async fn request_sync(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::request_sync(self.local_id, &self.room);
        let encoded = msg.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Current shadow text.
    pub async fn text(&self) -> String {
        self.shadow.read().await.clone()
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Room this client edits.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Get offline queue length.
    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }
}
