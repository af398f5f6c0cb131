//! Forwarding tracks.
//!
//! A [`ForwardingTrack`] is the server-owned sink for one publisher's RTP
//! stream: the session copies packets from the remote track into it, and the
//! media stack replicates them to every peer the track has been attached to.

use std::sync::Arc;

use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

pub struct ForwardingTrack {
    codec: RTCRtpCodecCapability,
    local: Arc<TrackLocalStaticRTP>,
}

impl ForwardingTrack {
    /// Creates a sink with the same codec, track id and stream id as the
    /// publisher's remote track, so subscribers see the publisher's identifiers.
    pub fn new(id: String, stream_id: String, codec: RTCRtpCodecCapability) -> Self {
        let local = Arc::new(TrackLocalStaticRTP::new(codec.clone(), id, stream_id));
        Self { codec, local }
    }

    pub fn id(&self) -> &str {
        self.local.id()
    }

    pub fn stream_id(&self) -> &str {
        self.local.stream_id()
    }

    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.codec
    }

    /// The local track handle to attach to a peer connection as a sender.
    pub fn rtp_sink(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.local)
    }

    pub async fn write_rtp(&self, packet: &rtp::packet::Packet) -> Result<(), webrtc::Error> {
        self.local.write_rtp(packet).await.map(|_| ())
    }
}
