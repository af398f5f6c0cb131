//! Peer-connection abstraction consumed by the room engine.
//!
//! The renegotiation loop and the session lifecycle only ever see these
//! traits; the production implementation over webrtc-rs lives in
//! [`crate::rtc`]. Keeping the seam here lets the room and session logic be
//! exercised without a media stack underneath.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::error::Result;
use crate::track::ForwardingTrack;

/// Events a peer connection surfaces to its owning session.
pub enum PeerEvent {
    /// A local ICE candidate, already encoded as a `candidate` payload.
    Candidate(String),
    StateChange(RTCPeerConnectionState),
    /// A remote track started; the session copies its RTP into the room.
    Track(Arc<dyn RemoteMedia>),
}

/// Receive side of a peer's event stream, handed out at construction.
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One inbound RTP stream from a publishing peer.
#[async_trait]
pub trait RemoteMedia: Send + Sync {
    fn id(&self) -> String;

    fn stream_id(&self) -> String;

    fn codec(&self) -> RTCRtpCodecCapability;

    /// The next RTP packet, or `None` once the remote side ends.
    async fn recv_rtp(&self) -> Option<rtp::packet::Packet>;
}

/// Per-peer row of the lobby inventory snapshot.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub signaling_state: String,
    pub connection_state: String,
    pub receivers: usize,
    pub senders: usize,
}

#[async_trait]
pub trait MediaPeer: Send + Sync {
    fn connection_state(&self) -> RTCPeerConnectionState;

    fn signaling_state(&self) -> RTCSignalingState;

    /// Resolves once the signaling state reaches Stable, or the connection
    /// closes, whichever comes first.
    async fn wait_until_stable(&self);

    /// Track ids of every sender with a live track.
    async fn sender_track_ids(&self) -> Vec<String>;

    /// Track ids of every receiver with a live track. These are the peer's
    /// own publications; the reconciliation loop uses them to keep a peer
    /// from being subscribed to itself.
    async fn receiver_track_ids(&self) -> Vec<String>;

    /// Attach a forwarding track as a new sender.
    async fn add_track(&self, track: &ForwardingTrack) -> Result<()>;

    /// Remove the sender carrying `track_id`.
    async fn remove_track(&self, track_id: &str) -> Result<()>;

    /// Create an offer, set it as the local description and return the
    /// serialized payload for an `offer` frame.
    async fn create_offer_payload(&self) -> Result<String>;

    async fn apply_answer(&self, payload: &str) -> Result<()>;

    async fn apply_candidate(&self, payload: &str) -> Result<()>;

    /// Best-effort Picture Loss Indication to every receiver with a live
    /// track, so a freshly subscribed viewer gets a decodable frame soon.
    async fn request_keyframes(&self);

    async fn snapshot(&self) -> PeerSnapshot;

    async fn close(&self);
}
