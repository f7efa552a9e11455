//! Room membership tracking for broadcast addressing.
//!
//! A non-owning many-to-many relation between connections and rooms: created
//! on join, removed on leave or disconnect. The relation is only ever used to
//! decide who should receive a broadcast; it never touches document state.
//!
//! Both directions of the relation live under a single lock so they can
//! never disagree.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Relation {
    rooms_by_client: HashMap<Uuid, HashSet<String>>,
    clients_by_room: HashMap<String, HashSet<Uuid>>,
}

/// Tracks which rooms each connected client has joined.
pub struct Membership {
    relation: RwLock<Relation>,
}

impl Membership {
    pub fn new() -> Self {
        Self {
            relation: RwLock::new(Relation::default()),
        }
    }

    /// Record that `client` joined `room`. Idempotent.
    ///
    /// Returns true if the membership was newly created.
    pub async fn join(&self, client: Uuid, room: &str) -> bool {
        let mut rel = self.relation.write().await;
        let created = rel
            .rooms_by_client
            .entry(client)
            .or_default()
            .insert(room.to_string());
        if created {
            rel.clients_by_room
                .entry(room.to_string())
                .or_default()
                .insert(client);
        }
        created
    }

    /// Remove one membership. Removing a non-existent membership is a no-op.
    pub async fn leave(&self, client: Uuid, room: &str) {
        let mut rel = self.relation.write().await;
        if let Some(rooms) = rel.rooms_by_client.get_mut(&client) {
            rooms.remove(room);
            if rooms.is_empty() {
                rel.rooms_by_client.remove(&client);
            }
        }
        if let Some(clients) = rel.clients_by_room.get_mut(room) {
            clients.remove(&client);
            if clients.is_empty() {
                rel.clients_by_room.remove(room);
            }
        }
    }

    /// Remove every membership of `client`, returning the rooms it left.
    ///
    /// Driven by transport disconnect notifications; never touches documents.
    pub async fn disconnect(&self, client: Uuid) -> Vec<String> {
        let mut rel = self.relation.write().await;
        let rooms: Vec<String> = rel
            .rooms_by_client
            .remove(&client)
            .map(|r| r.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(clients) = rel.clients_by_room.get_mut(room) {
                clients.remove(&client);
                if clients.is_empty() {
                    rel.clients_by_room.remove(room);
                }
            }
        }
        rooms
    }

    /// Clients currently joined to `room`.
    pub async fn members_of(&self, room: &str) -> Vec<Uuid> {
        self.relation
            .read()
            .await
            .clients_by_room
            .get(room)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms `client` is currently joined to.
    pub async fn rooms_of(&self, client: Uuid) -> Vec<String> {
        self.relation
            .read()
            .await
            .rooms_by_client
            .get(&client)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `client` is a member of `room`.
    pub async fn is_member(&self, client: Uuid, room: &str) -> bool {
        self.relation
            .read()
            .await
            .rooms_by_client
            .get(&client)
            .is_some_and(|rooms| rooms.contains(room))
    }

    /// Number of clients with at least one membership.
    pub async fn client_count(&self) -> usize {
        self.relation.read().await.rooms_by_client.len()
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_and_query() {
        let membership = Membership::new();
        let client = Uuid::new_v4();

        assert!(membership.join(client, "doc1").await);
        assert!(membership.is_member(client, "doc1").await);
        assert_eq!(membership.members_of("doc1").await, vec![client]);
        assert_eq!(membership.rooms_of(client).await, vec!["doc1".to_string()]);
    }

    #[tokio::test]
    async fn test_join_idempotent() {
        let membership = Membership::new();
        let client = Uuid::new_v4();

        assert!(membership.join(client, "doc1").await);
        assert!(!membership.join(client, "doc1").await);

        assert_eq!(membership.members_of("doc1").await.len(), 1);
        assert_eq!(membership.rooms_of(client).await.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_room_membership() {
        let membership = Membership::new();
        let client = Uuid::new_v4();

        membership.join(client, "a").await;
        membership.join(client, "b").await;
        membership.join(client, "c").await;

        let mut rooms = membership.rooms_of(client).await;
        rooms.sort();
        assert_eq!(rooms, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_leave() {
        let membership = Membership::new();
        let client = Uuid::new_v4();

        membership.join(client, "doc1").await;
        membership.leave(client, "doc1").await;

        assert!(!membership.is_member(client, "doc1").await);
        assert!(membership.members_of("doc1").await.is_empty());
        assert_eq!(membership.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_nonexistent_is_noop() {
        let membership = Membership::new();
        // Must not panic or error.
        membership.leave(Uuid::new_v4(), "nowhere").await;
        assert_eq!(membership.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_removes_all_memberships() {
        let membership = Membership::new();
        let leaver = Uuid::new_v4();
        let stayer = Uuid::new_v4();

        membership.join(leaver, "a").await;
        membership.join(leaver, "b").await;
        membership.join(stayer, "a").await;

        let mut left = membership.disconnect(leaver).await;
        left.sort();
        assert_eq!(left, vec!["a", "b"]);

        assert!(membership.rooms_of(leaver).await.is_empty());
        // The other client's membership is untouched.
        assert_eq!(membership.members_of("a").await, vec![stayer]);
        // Room "b" is now empty and dropped from the reverse index.
        assert!(membership.members_of("b").await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_client() {
        let membership = Membership::new();
        assert!(membership.disconnect(Uuid::new_v4()).await.is_empty());
    }
}
