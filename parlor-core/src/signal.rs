//! Signaling envelope shared by session and lobby sockets.
//!
//! Every frame on the wire is `{"event": <string>, "data": <string>}` where
//! `data` carries a JSON document serialized as a string (the envelope is
//! JSON, the payload is JSON-in-a-string). The double encoding is wire
//! format and must survive as-is.

use serde::{Deserialize, Serialize};

/// Server → client: SDP offer.
pub const EVENT_OFFER: &str = "offer";
/// Client → server: SDP answer.
pub const EVENT_ANSWER: &str = "answer";
/// Both directions: trickle ICE candidate.
pub const EVENT_CANDIDATE: &str = "candidate";
/// Client → server: the client added a local track and wants a fresh offer.
pub const EVENT_ADD_TRACK: &str = "addTrack";
/// Server → client heartbeat.
pub const EVENT_KEEPALIVE: &str = "keepalive";
/// Lobby client → server: request an inventory snapshot now.
pub const EVENT_UPDATE: &str = "update";
/// Lobby server → client: room inventory snapshot.
pub const EVENT_INFO: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingFrame {
    pub event: String,
    #[serde(default)]
    pub data: String,
}

impl SignalingFrame {
    pub fn new(event: &str, data: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            data: data.into(),
        }
    }

    pub fn keepalive() -> Self {
        Self::new(EVENT_KEEPALIVE, "")
    }

    pub fn offer(payload: String) -> Self {
        Self::new(EVENT_OFFER, payload)
    }

    pub fn candidate(payload: String) -> Self {
        Self::new(EVENT_CANDIDATE, payload)
    }

    pub fn info(payload: String) -> Self {
        Self::new(EVENT_INFO, payload)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
