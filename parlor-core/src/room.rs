//! Conference rooms and the renegotiation engine.
//!
//! A room owns the sessions of every connected participant and the set of
//! forwarding tracks they publish. Whenever that track roster changes (a
//! publish, an unpublish, or a peer departure), `renegotiate` reconciles each
//! peer's sender set against the roster and drives the peer through a fresh
//! offer, without deadlocking against signaling that is already in flight.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::config::RoomConfig;
use crate::lobby::LobbyNotifier;
use crate::peer::{MediaPeer, PeerSnapshot, RemoteMedia};
use crate::signal::SignalingFrame;
use crate::track::ForwardingTrack;
use crate::transport::FrameSender;

/// Stable identifier for a session. Members are always addressed by id;
/// positions in the member list shift under removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Member {
    id: SessionId,
    peer: Arc<dyn MediaPeer>,
    signaling: Arc<dyn FrameSender>,
}

#[derive(Default)]
struct RoomState {
    /// Insertion-ordered members.
    members: Vec<Member>,
    /// Forwarding tracks keyed by the publisher-assigned track id.
    tracks: HashMap<String, Arc<ForwardingTrack>>,
}

enum SyncOutcome {
    Converged,
    Retry,
}

pub struct Room {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: RoomConfig,
    notifier: LobbyNotifier,
    state: RwLock<RoomState>,
    /// Self-handle for tasks the room schedules about itself.
    weak_self: Weak<Room>,
}

impl Room {
    pub(crate) fn new(id: Uuid, config: RoomConfig, notifier: LobbyNotifier) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id,
            created_at: Utc::now(),
            config,
            notifier,
            state: RwLock::new(RoomState::default()),
            weak_self: weak_self.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.members.is_empty()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn track_count(&self) -> usize {
        self.state.read().await.tracks.len()
    }

    /// Appends a session. The caller is expected to follow up with
    /// `renegotiate` once the session is ready for its initial offer.
    pub async fn add_session(
        &self,
        id: SessionId,
        peer: Arc<dyn MediaPeer>,
        signaling: Arc<dyn FrameSender>,
    ) {
        let mut state = self.state.write().await;
        state.members.push(Member {
            id,
            peer,
            signaling,
        });
        drop(state);
        info!(room = %self.id, session = %id, "session joined");
        self.notifier
            .publish(format!("session {id} joined room {}", self.id));
    }

    /// Registers a forwarding track for a newly arrived remote track and
    /// renegotiates the room. The caller copies inbound RTP into the
    /// returned sink for as long as the publisher keeps sending.
    pub async fn publish_remote_track(&self, remote: &dyn RemoteMedia) -> Arc<ForwardingTrack> {
        let track = Arc::new(ForwardingTrack::new(
            remote.id(),
            remote.stream_id(),
            remote.codec(),
        ));
        {
            let mut state = self.state.write().await;
            state.tracks.insert(remote.id(), Arc::clone(&track));
        }
        info!(room = %self.id, track = %track.id(), "track published");
        self.notifier
            .publish(format!("track {} published in room {}", track.id(), self.id));
        self.renegotiate().await;
        track
    }

    /// Withdraws a forwarding track and renegotiates the room.
    pub async fn unpublish_track(&self, track: &ForwardingTrack) {
        {
            let mut state = self.state.write().await;
            state.tracks.remove(track.id());
        }
        info!(room = %self.id, track = %track.id(), "track unpublished");
        self.notifier.publish(format!(
            "track {} unpublished in room {}",
            track.id(),
            self.id
        ));
        self.renegotiate().await;
    }

    /// Brings every peer's sender set into agreement with the room's tracks
    /// and sends a fresh offer to each peer.
    ///
    /// Holds the room write lock for up to `sync_attempts` reconciliation
    /// attempts. If the roster still has not converged, typically because a
    /// peer's signaling never settles, the lock is released and a retry is
    /// scheduled on its own task, so publish/unpublish callers queued on the
    /// lock are not starved.
    pub async fn renegotiate(&self) {
        {
            let mut state = self.state.write().await;
            for _ in 0..self.config.sync_attempts {
                match self.attempt_sync(&mut state).await {
                    SyncOutcome::Converged => {
                        drop(state);
                        self.request_keyframes().await;
                        return;
                    }
                    SyncOutcome::Retry => {}
                }
            }
        }

        debug!(room = %self.id, "renegotiation attempts spent, deferring");
        if let Some(room) = self.weak_self.upgrade() {
            schedule_deferred_retry(room);
        }
    }

    /// One reconciliation pass over the member list. Any mutation failure or
    /// roster change restarts the pass from the first member.
    async fn attempt_sync(&self, state: &mut RoomState) -> SyncOutcome {
        let mut index = 0;
        while index < state.members.len() {
            if state.members[index].peer.connection_state() == RTCPeerConnectionState::Closed {
                let gone = state.members.remove(index);
                info!(room = %self.id, session = %gone.id, "session pruned");
                self.notifier
                    .publish(format!("session {} left room {}", gone.id, self.id));
                return SyncOutcome::Retry;
            }

            let member = &state.members[index];

            // Track ids already represented on this peer: its current senders
            // plus its own publications, so nobody is subscribed to themselves.
            let mut known: HashSet<String> = HashSet::new();

            for track_id in member.peer.sender_track_ids().await {
                known.insert(track_id.clone());
                if !state.tracks.contains_key(&track_id) {
                    // The publisher left. Removing a sender mid-negotiation
                    // fails, so wait for signaling to settle first.
                    member.peer.wait_until_stable().await;
                    if let Err(e) = member.peer.remove_track(&track_id).await {
                        debug!(room = %self.id, track = %track_id, error = %e, "sender removal failed");
                        return SyncOutcome::Retry;
                    }
                }
            }

            for track_id in member.peer.receiver_track_ids().await {
                known.insert(track_id);
            }

            for (track_id, track) in &state.tracks {
                if !known.contains(track_id) {
                    if let Err(e) = member.peer.add_track(track).await {
                        debug!(room = %self.id, track = %track_id, error = %e, "sender attach failed");
                        return SyncOutcome::Retry;
                    }
                }
            }

            let payload = match member.peer.create_offer_payload().await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(room = %self.id, session = %member.id, error = %e, "offer creation failed");
                    return SyncOutcome::Retry;
                }
            };

            if let Err(e) = member
                .signaling
                .send(&SignalingFrame::offer(payload))
                .await
            {
                debug!(room = %self.id, session = %member.id, error = %e, "offer write failed");
                return SyncOutcome::Retry;
            }

            index += 1;
        }

        SyncOutcome::Converged
    }

    /// Asks every publisher in the room for a keyframe, so the subscribers a
    /// renegotiation just attached start with a decodable picture.
    pub async fn request_keyframes(&self) {
        let state = self.state.write().await;
        for member in &state.members {
            member.peer.request_keyframes().await;
        }
    }

    /// Per-session stats rows in member order, for the lobby inventory.
    pub async fn session_snapshots(&self) -> Vec<PeerSnapshot> {
        let state = self.state.read().await;
        let mut rows = Vec::with_capacity(state.members.len());
        for member in &state.members {
            rows.push(member.peer.snapshot().await);
        }
        rows
    }
}

/// Retries a renegotiation that ran out of attempts, after a pause and off
/// the caller's task so lock holders can drain first.
fn schedule_deferred_retry(room: Arc<Room>) {
    tokio::spawn(async move {
        tokio::time::sleep(room.config.sync_retry_delay()).await;
        room.renegotiate().await;
    });
}
