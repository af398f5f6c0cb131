//! Shared fixtures: in-memory peers, remote media and transports for
//! exercising the room, session and lobby machinery without a media stack.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::error::Result;
use crate::peer::{MediaPeer, PeerEvent, PeerEvents, PeerSnapshot, RemoteMedia};
use crate::signal::SignalingFrame;
use crate::track::ForwardingTrack;
use crate::transport::{FrameReceiver, FrameSender, TransportError};

type TransportResult = std::result::Result<SignalingFrame, TransportError>;

pub(crate) struct MockPeer {
    conn_tx: watch::Sender<RTCPeerConnectionState>,
    conn_rx: watch::Receiver<RTCPeerConnectionState>,
    signaling_tx: watch::Sender<RTCSignalingState>,
    signaling_rx: watch::Receiver<RTCSignalingState>,
    senders: Mutex<Vec<String>>,
    receivers: Mutex<Vec<String>>,
    offers: AtomicUsize,
    keyframes: AtomicUsize,
    failing_adds: AtomicUsize,
    answers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<String>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl MockPeer {
    pub(crate) fn new() -> (Arc<Self>, PeerEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = watch::channel(RTCPeerConnectionState::New);
        let (signaling_tx, signaling_rx) = watch::channel(RTCSignalingState::Stable);
        let peer = Arc::new(Self {
            conn_tx,
            conn_rx,
            signaling_tx,
            signaling_rx,
            senders: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            keyframes: AtomicUsize::new(0),
            failing_adds: AtomicUsize::new(0),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            events_tx,
        });
        (peer, events_rx)
    }

    pub(crate) fn add_receiver_track(&self, id: &str) {
        self.receivers.lock().push(id.to_string());
    }

    /// Plants a sender directly, as if left over from an earlier negotiation.
    pub(crate) fn add_sender_track(&self, id: &str) {
        self.senders.lock().push(id.to_string());
    }

    pub(crate) fn set_connection_state(&self, state: RTCPeerConnectionState) {
        let _ = self.conn_tx.send(state);
        let _ = self.events_tx.send(PeerEvent::StateChange(state));
    }

    pub(crate) fn set_signaling_state(&self, state: RTCSignalingState) {
        let _ = self.signaling_tx.send(state);
    }

    /// The next `n` sender attaches fail, like a peer whose negotiation is
    /// wedged.
    pub(crate) fn fail_next_adds(&self, n: usize) {
        self.failing_adds.store(n, Ordering::SeqCst);
    }

    pub(crate) fn emit_track(&self, media: Arc<dyn RemoteMedia>) {
        let _ = self.events_tx.send(PeerEvent::Track(media));
    }

    pub(crate) fn emit_candidate(&self, payload: &str) {
        let _ = self
            .events_tx
            .send(PeerEvent::Candidate(payload.to_string()));
    }

    pub(crate) fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub(crate) fn keyframe_requests(&self) -> usize {
        self.keyframes.load(Ordering::SeqCst)
    }

    pub(crate) fn applied_answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }

    pub(crate) fn applied_candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }
}

#[async_trait]
impl MediaPeer for MockPeer {
    fn connection_state(&self) -> RTCPeerConnectionState {
        *self.conn_rx.borrow()
    }

    fn signaling_state(&self) -> RTCSignalingState {
        *self.signaling_rx.borrow()
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
        self.senders.lock().clone()
    }

    async fn receiver_track_ids(&self) -> Vec<String> {
        self.receivers.lock().clone()
    }

    async fn add_track(&self, track: &ForwardingTrack) -> Result<()> {
        let failing = self.failing_adds.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_adds.store(failing - 1, Ordering::SeqCst);
            return Err(webrtc::Error::new("simulated add_track failure".to_string()).into());
        }
        self.senders.lock().push(track.id().to_string());
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        self.senders.lock().retain(|id| id != track_id);
        Ok(())
    }

    async fn create_offer_payload(&self) -> Result<String> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        let sdp = format!("v=0 senders:{}", self.senders.lock().join(","));
        Ok(serde_json::to_string(
            &serde_json::json!({"type": "offer", "sdp": sdp}),
        )?)
    }

    async fn apply_answer(&self, payload: &str) -> Result<()> {
        self.answers.lock().push(payload.to_string());
        Ok(())
    }

    async fn apply_candidate(&self, payload: &str) -> Result<()> {
        self.candidates.lock().push(payload.to_string());
        Ok(())
    }

    async fn request_keyframes(&self) {
        self.keyframes.fetch_add(1, Ordering::SeqCst);
    }

    async fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            signaling_state: self.signaling_state().to_string(),
            connection_state: self.connection_state().to_string(),
            receivers: self.receivers.lock().len(),
            senders: self.senders.lock().len(),
        }
    }

    async fn close(&self) {
        self.set_connection_state(RTCPeerConnectionState::Closed);
    }
}

pub(crate) struct MockRemoteMedia {
    id: String,
    stream_id: String,
    codec: RTCRtpCodecCapability,
    packets: AsyncMutex<mpsc::UnboundedReceiver<rtp::packet::Packet>>,
}

impl MockRemoteMedia {
    /// A publication with a stock codec; dropping the returned feed ends the
    /// stream.
    pub(crate) fn publication(
        id: &str,
        stream_id: &str,
    ) -> (Arc<Self>, mpsc::UnboundedSender<rtp::packet::Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let media = Arc::new(Self {
            id: id.to_string(),
            stream_id: stream_id.to_string(),
            codec: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                ..Default::default()
            },
            packets: AsyncMutex::new(rx),
        });
        (media, tx)
    }
}

#[async_trait]
impl RemoteMedia for MockRemoteMedia {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.codec.clone()
    }

    async fn recv_rtp(&self) -> Option<rtp::packet::Packet> {
        self.packets.lock().await.recv().await
    }
}

/// In-memory duplex transport. The test inspects what the server wrote via
/// `next_sent`/`sent_events` and injects client frames via `inject`.
pub(crate) struct MockTransport {
    out_tx: mpsc::UnboundedSender<SignalingFrame>,
    out_rx: AsyncMutex<mpsc::UnboundedReceiver<SignalingFrame>>,
    in_tx: Mutex<Option<mpsc::UnboundedSender<TransportResult>>>,
    in_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportResult>>>,
    broken: Arc<AtomicBool>,
    sent_log: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            out_tx,
            out_rx: AsyncMutex::new(out_rx),
            in_tx: Mutex::new(Some(in_tx)),
            in_rx: Mutex::new(Some(in_rx)),
            broken: Arc::new(AtomicBool::new(false)),
            sent_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn sender(&self) -> Arc<dyn FrameSender> {
        Arc::new(MockSender {
            out_tx: self.out_tx.clone(),
            broken: Arc::clone(&self.broken),
            sent_log: Arc::clone(&self.sent_log),
        })
    }

    /// The read side; may be taken once.
    pub(crate) fn receiver(&self) -> Box<dyn FrameReceiver> {
        let rx = self
            .in_rx
            .lock()
            .take()
            .expect("mock receiver already taken");
        Box::new(MockReceiver { rx })
    }

    pub(crate) fn inject(&self, frame: SignalingFrame) {
        if let Some(tx) = self.in_tx.lock().as_ref() {
            let _ = tx.send(Ok(frame));
        }
    }

    pub(crate) fn inject_error(&self, error: TransportError) {
        if let Some(tx) = self.in_tx.lock().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// Ends the inbound stream, like a client going away.
    pub(crate) fn close_inbound(&self) {
        self.in_tx.lock().take();
    }

    /// Makes every subsequent write fail.
    pub(crate) fn break_outbound(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn next_sent(&self) -> SignalingFrame {
        self.out_rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport outbound closed")
    }

    pub(crate) fn sent_events(&self) -> Vec<String> {
        self.sent_log.lock().clone()
    }
}

struct MockSender {
    out_tx: mpsc::UnboundedSender<SignalingFrame>,
    broken: Arc<AtomicBool>,
    sent_log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FrameSender for MockSender {
    async fn send(&self, frame: &SignalingFrame) -> std::result::Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("mock transport broken".into()));
        }
        self.sent_log.lock().push(frame.event.clone());
        self.out_tx
            .send(frame.clone())
            .map_err(|_| TransportError::Closed { code: 1006 })
    }

    async fn close(&self) {}
}

struct MockReceiver {
    rx: mpsc::UnboundedReceiver<TransportResult>,
}

#[async_trait]
impl FrameReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportResult> {
        self.rx.recv().await
    }
}
