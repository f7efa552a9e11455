//! # quire-collab — Room-based collaborative text synchronization
//!
//! Many clients edit a set of independent shared documents ("rooms") and
//! converge on one consistent text per room, exchanging incremental patches
//! rather than full snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per room)  │     Binary Proto    │ (transport) │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Shadow text │                     │ Coordinator │
//! │ (local)     │                     │ (protocol)  │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                ┌───────────┼───────────┐
//!                                ▼           ▼           ▼
//!                         DocumentStore  Membership  RoomGroup
//!                         (authority)    (who joined) (fan-out)
//! ```
//!
//! A submitted patch is applied to the room's authoritative text
//! all-or-nothing: if every hunk applies, the text advances and the original
//! patch is re-broadcast to the other room members; if any hunk fails, the
//! text is left untouched and the entire room, sender included, receives
//! the canonical text as a full resync. Conflicts are therefore a normal
//! outcome, never an error, and a client can always recover by requesting a
//! resync.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded [`SyncMessage`])
//! - [`patch`] — Patch engine adapter (diff-match-patch text patches)
//! - [`store`] — In-memory authoritative document store
//! - [`membership`] — Client↔room membership tracking
//! - [`coordinator`] — The synchronization protocol core
//! - [`broadcast`] — Room fan-out with per-receiver buffering
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket sync client with offline queue

pub mod broadcast;
pub mod client;
pub mod coordinator;
pub mod membership;
pub mod patch;
pub mod protocol;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{RoomDirectory, RoomGroup, RoomStats};
pub use client::{ConnectionState, OfflineQueue, SyncClient, SyncEvent};
pub use coordinator::{Coordinator, Delivery};
pub use membership::Membership;
pub use patch::{PatchEngine, PatchError, PatchSet};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use store::DocumentStore;
