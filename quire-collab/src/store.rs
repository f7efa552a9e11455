//! In-memory document store: one authoritative text per room.
//!
//! Rooms are created lazily: the first `get`, `set`, or `update` against an
//! unknown key materializes an empty document. There is no notion of a
//! missing room after first access, no eviction, and no persistence:
//! documents live for the life of the process.
//!
//! `update` is the store's serialization point. It runs the caller's
//! read-evaluate-commit closure while holding the write lock, so two patches
//! against the same room can never interleave their read-modify-write, the
//! one race the sync design cannot tolerate.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Holds the current authoritative text for every known room.
///
/// One instance per process; all mutation goes through `set`/`update`.
pub struct DocumentStore {
    docs: RwLock<HashMap<String, String>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Current text for `room`, creating an empty document on first reference.
    ///
    /// Never fails; repeat calls for the same unknown key read the value the
    /// first call created.
    pub async fn get(&self, room: &str) -> String {
        {
            let docs = self.docs.read().await;
            if let Some(text) = docs.get(room) {
                return text.clone();
            }
        }

        let mut docs = self.docs.write().await;
        docs.entry(room.to_string()).or_default().clone()
    }

    /// Replace the document's text unconditionally.
    pub async fn set(&self, room: &str, text: String) {
        let mut docs = self.docs.write().await;
        docs.insert(room.to_string(), text);
    }

    /// Run `f` against the room's current text under the write lock.
    ///
    /// `f` returning `Some(new_text)` commits it atomically; `None` leaves
    /// the document untouched. Returns the text after the call and whether a
    /// commit happened. `f` must not block: the lock is held across it.
    pub async fn update<F>(&self, room: &str, f: F) -> (String, bool)
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let mut docs = self.docs.write().await;
        let doc = docs.entry(room.to_string()).or_default();
        match f(doc) {
            Some(new_text) => {
                *doc = new_text;
                (doc.clone(), true)
            }
            None => (doc.clone(), false),
        }
    }

    /// Number of materialized rooms.
    pub async fn room_count(&self) -> usize {
        self.docs.read().await.len()
    }

    /// All materialized room keys.
    pub async fn rooms(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
