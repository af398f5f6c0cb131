//! webrtc-rs implementation of the [`MediaPeer`] abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::WebRtcConfig;
use crate::error::Result;
use crate::peer::{MediaPeer, PeerEvent, PeerEvents, PeerSnapshot, RemoteMedia};
use crate::track::ForwardingTrack;

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    signaling_rx: watch::Receiver<RTCSignalingState>,
    conn_rx: watch::Receiver<RTCPeerConnectionState>,
}

impl RtcPeer {
    /// Builds a peer connection for one conference participant: STUN from
    /// configuration and the fixed receive pattern of two video tracks plus
    /// one audio track.
    pub async fn connect(config: &WebRtcConfig) -> Result<(Arc<Self>, PeerEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        for kind in [
            RTPCodecType::Video,
            RTPCodecType::Video,
            RTPCodecType::Audio,
        ] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signaling_tx, signaling_rx) = watch::channel(pc.signaling_state());
        let (conn_tx, conn_rx) = watch::channel(pc.connection_state());

        {
            let events = events_tx.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!(error = %e, "local ICE candidate lost");
                            return;
                        }
                    };
                    match serde_json::to_string(&init) {
                        Ok(payload) => {
                            let _ = events.send(PeerEvent::Candidate(payload));
                        }
                        Err(e) => warn!(error = %e, "local ICE candidate lost"),
                    }
                })
            }));
        }

        {
            let events = events_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |state| {
                let _ = conn_tx.send(state);
                let _ = events.send(PeerEvent::StateChange(state));
                Box::pin(async {})
            }));
        }

        pc.on_signaling_state_change(Box::new(move |state| {
            let _ = signaling_tx.send(state);
            Box::pin(async {})
        }));

        {
            let events = events_tx;
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                // Hand the track off and return at once; blocking here stalls
                // delivery of every later track on this connection.
                let _ = events.send(PeerEvent::Track(Arc::new(RtcRemoteMedia::new(track))));
                Box::pin(async {})
            }));
        }

        Ok((
            Arc::new(Self {
                pc,
                signaling_rx,
                conn_rx,
            }),
            events_rx,
        ))
    }
}

#[async_trait]
impl MediaPeer for RtcPeer {
    fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    fn signaling_state(&self) -> RTCSignalingState {
        self.pc.signaling_state()
    }

    async fn wait_until_stable(&self) {
        let mut signaling = self.signaling_rx.clone();
        let mut conn = self.conn_rx.clone();
        loop {
            if *signaling.borrow() == RTCSignalingState::Stable
                || *conn.borrow() == RTCPeerConnectionState::Closed
            {
                return;
            }
            tokio::select! {
                changed = signaling.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = conn.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn sender_track_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_string());
            }
        }
        ids
    }

    async fn receiver_track_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for receiver in self.pc.get_receivers().await {
            if let Some(track) = receiver.tracks().await.into_iter().next() {
                ids.push(track.id());
            }
        }
        ids
    }

    async fn add_track(&self, track: &ForwardingTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.rtp_sink() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain incoming RTCP so the interceptors keep running; the task ends
        // when the sender is removed or the connection closes.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        });

        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        for sender in self.pc.get_senders().await {
            let carries = sender
                .track()
                .await
                .map(|t| t.id() == track_id)
                .unwrap_or(false);
            if carries {
                self.pc.remove_track(&sender).await?;
            }
        }
        Ok(())
    }

    async fn create_offer_payload(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(serde_json::to_string(&offer)?)
    }

    async fn apply_answer(&self, payload: &str) -> Result<()> {
        let answer: RTCSessionDescription = serde_json::from_str(payload)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn apply_candidate(&self, payload: &str) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(payload)?;
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn request_keyframes(&self) {
        for receiver in self.pc.get_receivers().await {
            if let Some(track) = receiver.tracks().await.into_iter().next() {
                let pli = PictureLossIndication {
                    sender_ssrc: 0,
                    media_ssrc: track.ssrc(),
                };
                if let Err(e) = self.pc.write_rtcp(&[Box::new(pli)]).await {
                    debug!(error = %e, "keyframe request dropped");
                }
            }
        }
    }

    async fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            signaling_state: self.pc.signaling_state().to_string(),
            connection_state: self.pc.connection_state().to_string(),
            receivers: self.pc.get_receivers().await.len(),
            senders: self.pc.get_senders().await.len(),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}

struct RtcRemoteMedia {
    track: Arc<TrackRemote>,
    buf: Mutex<Vec<u8>>,
}

impl RtcRemoteMedia {
    fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            track,
            buf: Mutex::new(vec![0u8; 1500]),
        }
    }
}

#[async_trait]
impl RemoteMedia for RtcRemoteMedia {
    fn id(&self) -> String {
        self.track.id()
    }

    fn stream_id(&self) -> String {
        self.track.stream_id()
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.track.codec().capability
    }

    async fn recv_rtp(&self) -> Option<rtp::packet::Packet> {
        let mut buf = self.buf.lock().await;
        match self.track.read(&mut buf).await {
            Ok((packet, _)) => Some(packet),
            Err(_) => None,
        }
    }
}
