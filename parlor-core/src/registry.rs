//! Process-wide room registry.
//!
//! Owns every live [`Room`]. All access goes through methods that take the
//! registry lock; nothing else ever sees the underlying map.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::RoomConfig;
use crate::lobby::LobbyNotifier;
use crate::room::Room;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
    config: RoomConfig,
    notifier: LobbyNotifier,
    /// Self-handle for the per-room collector tasks.
    weak_self: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig, notifier: LobbyNotifier) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            rooms: RwLock::new(HashMap::new()),
            config,
            notifier,
            weak_self: weak_self.clone(),
        })
    }

    /// Allocates a fresh room, starts its empty-room collector and announces
    /// it on the lobby bus.
    pub async fn create(&self) -> Arc<Room> {
        let id = Uuid::new_v4();
        let room = Room::new(id, self.config.clone(), self.notifier.clone());
        self.rooms.write().await.insert(id, Arc::clone(&room));
        self.spawn_gc(Arc::clone(&room));
        info!(room = %id, "room created");
        self.notifier.publish(format!("room ID {id} created."));
        room
    }

    pub async fn lookup(&self, id: Uuid) -> Option<Arc<Room>> {
        self.rooms.read().await.get(&id).cloned()
    }

    /// Unregisters a room. Returns false when the room was already gone.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.rooms.write().await.remove(&id).is_some();
        if removed {
            info!(room = %id, "room deleted");
            self.notifier.publish(format!("room ID {id} deleted"));
        }
        removed
    }

    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Empty-room collector: one task per room. A room found empty on a
    /// wake-up is unregistered for good; rooms are never revived.
    fn spawn_gc(&self, room: Arc<Room>) {
        let registry = self.weak_self.clone();
        let interval = self.config.gc_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if room.is_empty().await {
                    if let Some(registry) = registry.upgrade() {
                        registry.remove(room.id()).await;
                    }
                    return;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LobbyConfig;
    use crate::lobby::LobbySignaling;
    use crate::room::SessionId;
    use crate::test_support::{MockPeer, MockTransport};

    fn test_registry() -> (Arc<RoomRegistry>, tokio::sync::broadcast::Receiver<String>) {
        let lobby = LobbySignaling::new(LobbyConfig::default());
        let updates = lobby.subscribe_updates();
        (RoomRegistry::new(RoomConfig::default(), lobby.notifier()), updates)
    }

    #[tokio::test]
    async fn create_lookup_remove() {
        let (registry, mut updates) = test_registry();

        let room = registry.create().await;
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.lookup(room.id()).await.is_some());
        assert_eq!(
            updates.recv().await.unwrap(),
            format!("room ID {} created.", room.id())
        );

        assert!(registry.remove(room.id()).await);
        assert!(registry.lookup(room.id()).await.is_none());
        assert_eq!(
            updates.recv().await.unwrap(),
            format!("room ID {} deleted", room.id())
        );

        // Removal is idempotent and announces only once.
        assert!(!registry.remove(room.id()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_is_collected_after_one_cycle() {
        let (registry, _updates) = test_registry();
        let room = registry.create().await;

        tokio::time::sleep(RoomConfig::default().gc_interval() * 2).await;
        assert!(registry.lookup(room.id()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn occupied_room_survives_collection() {
        let (registry, _updates) = test_registry();
        let room = registry.create().await;

        let (peer, _events) = MockPeer::new();
        let transport = MockTransport::new();
        room.add_session(SessionId::new(), peer, transport.sender()).await;

        tokio::time::sleep(RoomConfig::default().gc_interval() * 3).await;
        assert!(registry.lookup(room.id()).await.is_some());
    }
}
