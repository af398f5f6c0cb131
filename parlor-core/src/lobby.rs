//! Lobby signaling.
//!
//! A process-wide bus that pushes the current room inventory to every
//! subscribed lobby client whenever the registry or a room mutates. The
//! publishing side never blocks: the bus has a small capacity and overflow
//! drops the oldest pending update, which is harmless because every dispatch
//! recomputes the full snapshot anyway.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::LobbyConfig;
use crate::registry::RoomRegistry;
use crate::signal::{self, SignalingFrame};
use crate::transport::{spawn_reader, FrameReceiver, FrameSender};

/// Write side of the lobby update bus, held by the registry and the rooms.
#[derive(Clone)]
pub struct LobbyNotifier(broadcast::Sender<String>);

impl LobbyNotifier {
    /// Queues an update. Never blocks; with no dispatcher running the update
    /// simply evaporates.
    pub fn publish(&self, update: impl Into<String>) {
        let _ = self.0.send(update.into());
    }
}

/// One row of the room inventory. Field names are wire format, preserved
/// verbatim, including the historical misspelling of the connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "No")]
    pub no: usize,
    pub signaling_state: String,
    #[serde(rename = "peerConnectio_state")]
    pub peer_connection_state: String,
    pub receive_track_num: usize,
    pub send_track_num: usize,
}

/// Room-id string → ordered session descriptors.
pub type RoomInventory = HashMap<String, Vec<SessionDescriptor>>;

struct Subscriber {
    id: Uuid,
    sink: Arc<dyn FrameSender>,
}

pub struct LobbySignaling {
    updates: broadcast::Sender<String>,
    subscribers: RwLock<Vec<Subscriber>>,
    config: LobbyConfig,
}

impl LobbySignaling {
    pub fn new(config: LobbyConfig) -> Arc<Self> {
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        Arc::new(Self {
            updates,
            subscribers: RwLock::new(Vec::new()),
            config,
        })
    }

    pub fn notifier(&self) -> LobbyNotifier {
        LobbyNotifier(self.updates.clone())
    }

    /// Starts the dispatcher task: one consumer that turns every queued
    /// update into a snapshot push to all subscribers.
    pub fn start(self: Arc<Self>, registry: Arc<RoomRegistry>) {
        let mut updates = self.updates.subscribe();
        let lobby = self;
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        info!(update = %update, "lobby update");
                        lobby.push_inventory(&registry).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Oldest updates were dropped on overflow; the next
                        // snapshot covers for them.
                        warn!(skipped, "lobby update bus overflowed");
                        lobby.push_inventory(&registry).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Computes the snapshot once and writes it to every subscriber. A
    /// subscriber that errors is dropped from the list.
    async fn push_inventory(&self, registry: &RoomRegistry) {
        let payload = match encode_inventory(registry).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "room inventory serialization failed");
                return;
            }
        };
        let frame = SignalingFrame::info(payload);

        let mut failed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for subscriber in subscribers.iter() {
                if let Err(e) = subscriber.sink.send(&frame).await {
                    if !e.is_expected_close() {
                        error!(error = %e, "lobby subscriber write failed");
                    }
                    failed.push(subscriber.id);
                }
            }
        }
        if !failed.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|s| !failed.contains(&s.id));
        }
    }

    /// Serves one lobby client to completion: greets it with the current
    /// inventory, registers it for pushes, then runs the keepalive/update
    /// loop until the connection goes away.
    pub async fn run_subscriber(
        &self,
        registry: &RoomRegistry,
        sink: Arc<dyn FrameSender>,
        source: Box<dyn FrameReceiver>,
    ) {
        let id = Uuid::new_v4();

        match encode_inventory(registry).await {
            Ok(payload) => {
                if sink.send(&SignalingFrame::info(payload)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "room inventory serialization failed");
                return;
            }
        }

        self.subscribers.write().await.push(Subscriber {
            id,
            sink: Arc::clone(&sink),
        });
        info!(subscriber = %id, "lobby subscriber joined");

        let mut frames = spawn_reader(source);
        let period = self.config.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(e) = sink.send(&SignalingFrame::keepalive()).await {
                        if !e.is_expected_close() {
                            error!(subscriber = %id, error = %e, "keepalive write failed");
                        }
                        break;
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    match frame.event.as_str() {
                        signal::EVENT_UPDATE => {
                            let payload = match encode_inventory(registry).await {
                                Ok(payload) => payload,
                                Err(e) => {
                                    error!(error = %e, "room inventory serialization failed");
                                    break;
                                }
                            };
                            if sink.send(&SignalingFrame::info(payload)).await.is_err() {
                                break;
                            }
                        }
                        other => {
                            error!(subscriber = %id, event = other, "unknown lobby event");
                            break;
                        }
                    }
                }
            }
        }

        self.subscribers.write().await.retain(|s| s.id != id);
        sink.close().await;
        info!(subscriber = %id, "lobby subscriber left");
    }

    #[cfg(test)]
    pub(crate) fn subscribe_updates(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Builds the inventory by traversing the registry under its read lock.
pub async fn build_inventory(registry: &RoomRegistry) -> RoomInventory {
    let mut inventory = RoomInventory::new();
    for room in registry.rooms().await {
        let rows = room
            .session_snapshots()
            .await
            .into_iter()
            .enumerate()
            .map(|(no, snapshot)| SessionDescriptor {
                no,
                signaling_state: snapshot.signaling_state,
                peer_connection_state: snapshot.connection_state,
                receive_track_num: snapshot.receivers,
                send_track_num: snapshot.senders,
            })
            .collect();
        inventory.insert(room.id().to_string(), rows);
    }
    inventory
}

async fn encode_inventory(registry: &RoomRegistry) -> Result<String, serde_json::Error> {
    serde_json::to_string(&build_inventory(registry).await)
}
