//! Per-peer session lifecycle.
//!
//! A session owns one client's signaling transport and peer connection. It
//! joins the room, triggers the initial renegotiation, then serves a select
//! loop (keepalive, inbound signaling, peer events) until either side goes
//! away, and tears both halves down on exit.

use std::sync::Arc;

use tracing::{debug, error, info};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::config::RoomConfig;
use crate::peer::{MediaPeer, PeerEvent, PeerEvents, RemoteMedia};
use crate::room::{Room, SessionId};
use crate::signal::{self, SignalingFrame};
use crate::transport::{spawn_reader, FrameReceiver, FrameSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Live,
    Closing,
    Closed,
}

pub struct Session {
    id: SessionId,
    room: Arc<Room>,
    peer: Arc<dyn MediaPeer>,
    signaling: Arc<dyn FrameSender>,
    state: SessionState,
}

impl Session {
    pub fn new(room: Arc<Room>, peer: Arc<dyn MediaPeer>, signaling: Arc<dyn FrameSender>) -> Self {
        Self {
            id: SessionId::new(),
            room,
            peer,
            signaling,
            state: SessionState::Handshaking,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    pub async fn run(
        mut self,
        mut peer_events: PeerEvents,
        source: Box<dyn FrameReceiver>,
        config: &RoomConfig,
    ) {
        self.room
            .add_session(self.id, Arc::clone(&self.peer), Arc::clone(&self.signaling))
            .await;
        self.room.renegotiate().await;
        self.state = SessionState::Live;
        info!(session = %self.id, room = %self.room.id(), "session live");

        let mut frames = spawn_reader(source);
        let period = config.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(e) = self.signaling.send(&SignalingFrame::keepalive()).await {
                        if !e.is_expected_close() {
                            error!(session = %self.id, error = %e, "keepalive write failed");
                        }
                        break;
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if !self.handle_frame(frame).await {
                        break;
                    }
                }
                event = peer_events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_peer_event(event).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Returns false when the session must end.
    async fn handle_frame(&self, frame: SignalingFrame) -> bool {
        match frame.event.as_str() {
            signal::EVENT_CANDIDATE => match self.peer.apply_candidate(&frame.data).await {
                Ok(()) => true,
                Err(e) => {
                    error!(session = %self.id, error = %e, "remote candidate rejected");
                    false
                }
            },
            signal::EVENT_ANSWER => match self.peer.apply_answer(&frame.data).await {
                Ok(()) => true,
                Err(e) => {
                    error!(session = %self.id, error = %e, "remote answer rejected");
                    false
                }
            },
            signal::EVENT_ADD_TRACK => {
                // The client added a local track and wants a fresh offer right
                // away instead of waiting for a room-driven renegotiation.
                let payload = match self.peer.create_offer_payload().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(session = %self.id, error = %e, "offer creation failed");
                        return false;
                    }
                };
                match self.signaling.send(&SignalingFrame::offer(payload)).await {
                    Ok(()) => true,
                    Err(e) => {
                        if !e.is_expected_close() {
                            error!(session = %self.id, error = %e, "offer write failed");
                        }
                        false
                    }
                }
            }
            other => {
                error!(session = %self.id, event = other, "unknown signaling event");
                false
            }
        }
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Candidate(payload) => {
                if let Err(e) = self
                    .signaling
                    .send(&SignalingFrame::candidate(payload))
                    .await
                {
                    if !e.is_expected_close() {
                        error!(session = %self.id, error = %e, "candidate write failed");
                    }
                }
            }
            PeerEvent::StateChange(state) => match state {
                RTCPeerConnectionState::Failed => self.peer.close().await,
                RTCPeerConnectionState::Closed => self.room.renegotiate().await,
                _ => debug!(session = %self.id, state = %state, "peer connection state"),
            },
            PeerEvent::Track(remote) => {
                info!(session = %self.id, track = %remote.id(), "remote track started");
                let room = Arc::clone(&self.room);
                tokio::spawn(async move {
                    forward_remote_track(room, remote).await;
                });
            }
        }
    }

    async fn shutdown(&mut self) {
        self.state = SessionState::Closing;
        self.peer.close().await;
        self.signaling.close().await;
        // The closed peer is pruned from the room on this reconciliation.
        self.room.renegotiate().await;
        self.state = SessionState::Closed;
        info!(session = %self.id, room = %self.room.id(), "session closed");
    }
}

/// Copies RTP from a remote track into a room-wide forwarding track until the
/// remote side ends, then withdraws the publication.
async fn forward_remote_track(room: Arc<Room>, remote: Arc<dyn RemoteMedia>) {
    let track = room.publish_remote_track(remote.as_ref()).await;
    while let Some(packet) = remote.recv_rtp().await {
        if let Err(e) = track.write_rtp(&packet).await {
            debug!(track = %track.id(), error = %e, "forwarding write failed");
            break;
        }
    }
    room.unpublish_track(&track).await;
}
