//! Synchronization coordinator: the per-room protocol core.
//!
//! ```text
//! inbound event ──► Coordinator ──► DocumentStore read/write
//!                        │      └─► PatchEngine decode/apply
//!                        ▼
//!                   Delivery (one addressing primitive)
//!                        │
//!                        ▼
//!                  transport adapter
//! ```
//!
//! Every room has exactly one authoritative text, and every operation against
//! a room is a single bounded unit of work: read, decode, apply, commit,
//! emit. ApplyPatch runs its read-evaluate-commit inside one
//! [`DocumentStore::update`] write-lock region, so patches against the same
//! room are totally ordered no matter how many connection tasks submit them.
//!
//! Accept policy is strict all-or-nothing: a patch commits only when every
//! hunk applies. Any failed hunk rejects the whole patch, leaves the text
//! untouched, and forces every room member, sender included, back onto one
//! canonical text via a full resync broadcast.

use std::sync::Arc;
use uuid::Uuid;

use crate::membership::Membership;
use crate::patch::{PatchEngine, PatchError};
use crate::protocol::SyncMessage;
use crate::store::DocumentStore;

/// What the transport should deliver after a coordinator operation.
///
/// Exactly the three addressing primitives the core requires from its
/// environment; the coordinator never enumerates room members itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Send to a single client (join/resync replies).
    ToClient { client: Uuid, message: SyncMessage },
    /// Broadcast to every room member except the message's sender
    /// (accepted patches).
    ToRoomExceptSender { message: SyncMessage },
    /// Broadcast to the entire room, sender included (conflict resync).
    ToRoom { message: SyncMessage },
}

/// The protocol core: drives the store and the patch engine, decides
/// broadcast versus full resync, and emits outbound deliveries.
pub struct Coordinator {
    store: Arc<DocumentStore>,
    membership: Arc<Membership>,
    engine: PatchEngine,
}

impl Coordinator {
    pub fn new(store: Arc<DocumentStore>, membership: Arc<Membership>) -> Self {
        Self {
            store,
            membership,
            engine: PatchEngine::new(),
        }
    }

    /// JoinRoom: register membership, materialize the document, reply with a
    /// full sync to the joining client only.
    ///
    /// An unknown room is legal and becomes a new empty room; there is no
    /// failure path.
    pub async fn join(&self, client: Uuid, room: &str) -> Delivery {
        let newly_joined = self.membership.join(client, room).await;
        let text = self.store.get(room).await;

        if newly_joined {
            log::info!("client {client} joined room {room:?}");
        } else {
            log::debug!("client {client} re-joined room {room:?}");
        }

        Delivery::ToClient {
            client,
            message: SyncMessage::sync(room, text),
        }
    }

    /// RequestSync: reply with the current document text, no state change.
    ///
    /// Tolerated without a prior join; the room is read (and created) as in
    /// [`Coordinator::join`].
    pub async fn request_sync(&self, client: Uuid, room: &str) -> Delivery {
        let text = self.store.get(room).await;
        log::debug!("client {client} requested resync of room {room:?}");

        Delivery::ToClient {
            client,
            message: SyncMessage::sync(room, text),
        }
    }

    /// ApplyPatch: decode, apply all-or-nothing, and pick exactly one of
    /// {patch broadcast to room minus sender, sync broadcast to whole room}.
    ///
    /// A malformed patch is an `Err`: the caller logs it and drops the
    /// request. No broadcast, no document change. A patch with zero hunks
    /// is `Ok(None)`: nothing to apply, nothing to deliver.
    pub async fn apply_patch(
        &self,
        client: Uuid,
        room: &str,
        patch_text: &str,
    ) -> Result<Option<Delivery>, PatchError> {
        let patches = self.engine.decode(patch_text)?;
        if patches.is_empty() {
            log::debug!("empty patch from {client} for room {room:?}, nothing to do");
            return Ok(None);
        }

        // Read-evaluate-commit under the store's write lock; the engine call
        // is synchronous and pure, so no await happens while it is held.
        let (text, committed) = self
            .store
            .update(room, |base| match self.engine.apply(&patches, base) {
                Ok((new_text, results)) if results.iter().all(|&ok| ok) => Some(new_text),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("patch engine failed applying to room {room:?}: {e}");
                    None
                }
            })
            .await;

        if committed {
            log::debug!(
                "patch from {client} accepted in room {room:?} ({} hunks)",
                patches.len()
            );
            Ok(Some(Delivery::ToRoomExceptSender {
                message: SyncMessage::patch(client, room, patch_text),
            }))
        } else {
            // Conflict: another patch won the race for this room's state.
            // Force everyone, sender included, back to the canonical text.
            log::info!("patch from {client} rejected in room {room:?}, broadcasting resync");
            Ok(Some(Delivery::ToRoom {
                message: SyncMessage::sync(room, text),
            }))
        }
    }

    /// Connection teardown: drop every membership of `client`.
    ///
    /// Returns the rooms left so the transport can release its per-room
    /// delivery resources. Documents are never touched.
    pub async fn disconnect(&self, client: Uuid) -> Vec<String> {
        let rooms = self.membership.disconnect(client).await;
        if !rooms.is_empty() {
            log::info!("client {client} disconnected from {} room(s)", rooms.len());
        }
        rooms
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }
}
