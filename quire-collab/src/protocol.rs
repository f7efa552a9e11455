//! Binary protocol for room-based patch synchronization.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬───────────────┬───────────────┐
//! │ msg_type │ client_id │ room          │ payload       │
//! │ 1 byte   │ 16 bytes  │ len-prefixed  │ len-prefixed  │
//! └──────────┴───────────┴───────────────┴───────────────┘
//! ```
//!
//! `payload` carries patch text for `Patch` messages and the full document
//! text for `Sync` messages; it is empty for `JoinRoom` and `RequestSync`.
//!
//! Messages originated by the server (sync replies and conflict broadcasts)
//! carry `client_id = Uuid::nil()`. Patch broadcasts keep the sender's id so
//! the delivery path can suppress the echo back to the sender.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client joins a room (membership + initial sync)
    JoinRoom = 1,
    /// Incremental patch against the room's document
    Patch = 2,
    /// Client asks for the full current document text
    RequestSync = 3,
    /// Full document text (join reply, resync reply, conflict broadcast)
    Sync = 4,
}

/// Top-level protocol message.
///
/// Serialized with bincode for minimal overhead. Room keys are opaque
/// strings chosen by clients; the server never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Originating connection, or `Uuid::nil()` for server-originated frames
    pub client_id: Uuid,
    /// Room key this message addresses
    pub room: String,
    /// Patch text or document text, depending on `msg_type`
    pub payload: String,
}

impl SyncMessage {
    /// Create a join request.
    pub fn join(client_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::JoinRoom,
            client_id,
            room: room.into(),
            payload: String::new(),
        }
    }

    /// Create a patch submission / broadcast carrying encoded patch text.
    pub fn patch(client_id: Uuid, room: impl Into<String>, patch_text: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Patch,
            client_id,
            room: room.into(),
            payload: patch_text.into(),
        }
    }

    /// Create a full-resync request.
    pub fn request_sync(client_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::RequestSync,
            client_id,
            room: room.into(),
            payload: String::new(),
        }
    }

    /// Create a server-originated sync frame carrying the full document text.
    pub fn sync(room: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Sync,
            client_id: Uuid::nil(),
            room: room.into(),
            payload: text.into(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Whether this frame was originated by the server rather than a client.
    pub fn is_server_originated(&self) -> bool {
        self.client_id.is_nil()
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    FrameTooLarge(usize),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::FrameTooLarge(n) => write!(f, "Frame of {n} bytes exceeds limit"),
        }
    }
}

impl std::error::Error for ProtocolError {}
