//! Room fan-out: per-room broadcast channels for the transport adapter.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! connection gets an independent receiver that buffers up to `capacity`
//! pre-encoded frames; a lagging receiver drops frames and recovers by
//! requesting a full resync, so sends stay fire-and-forget.
//!
//! Sender exclusion is the receiver's job: every subscriber sees every frame,
//! and the connection task drops frames whose `client_id` is its own.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, SyncMessage};

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_sent: u64,
    pub active_members: usize,
}

/// A fan-out group for a single room.
///
/// All members of the room share one broadcast channel of pre-encoded
/// frames.
pub struct RoomGroup {
    /// Broadcast channel sender, cloned per room
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connections currently attached to this room's channel
    members: RwLock<HashSet<Uuid>>,

    /// Frames buffered per receiver before lagging starts dropping
    capacity: usize,

    /// Lock-free send counter
    frames_sent: AtomicU64,
}

impl RoomGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(HashSet::new()),
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Attach a connection, returning its receiver. Idempotent on the
    /// member set; each call returns a fresh receiver.
    pub async fn join(&self, client: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.members.write().await.insert(client);
        self.sender.subscribe()
    }

    /// Detach a connection. Returns whether it was attached.
    pub async fn leave(&self, client: Uuid) -> bool {
        self.members.write().await.remove(&client)
    }

    /// Broadcast a message to every subscriber.
    ///
    /// Returns the number of receivers the frame reached. No lock is taken;
    /// the counter is atomic.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    pub fn broadcast_raw(&self, frame: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Current member count.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether a connection is attached.
    pub async fn has_member(&self, client: Uuid) -> bool {
        self.members.read().await.contains(&client)
    }

    /// Fan-out statistics snapshot.
    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            active_members: self.members.read().await.len(),
        }
    }

    /// Channel capacity per receiver.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room directory: maps room keys to fan-out groups.
///
/// Groups exist only while the room has connected members; the document text
/// itself lives in the store for the process lifetime regardless.
pub struct RoomDirectory {
    rooms: RwLock<HashMap<String, Arc<RoomGroup>>>,
    default_capacity: usize,
}

impl RoomDirectory {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the fan-out group for a room.
    pub async fn get_or_create(&self, room: &str) -> Arc<RoomGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(group) = rooms.get(room) {
                return group.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(group) = rooms.get(room) {
            return group.clone();
        }

        let group = Arc::new(RoomGroup::new(self.default_capacity));
        rooms.insert(room.to_string(), group.clone());
        group
    }

    /// Group for a room, if one currently exists.
    pub async fn get(&self, room: &str) -> Option<Arc<RoomGroup>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Remove a room's group once its last member is gone.
    pub async fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(group) = rooms.get(room) {
            if group.member_count().await == 0 {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    /// Number of rooms with live fan-out groups.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Keys of all rooms with live fan-out groups.
    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
