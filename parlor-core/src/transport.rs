//! Signaling-transport abstraction.
//!
//! The core never touches a socket directly: sessions and lobby subscribers
//! speak through these traits, and the server binary supplies the WebSocket
//! implementations. Writes through a [`FrameSender`] are serialized; a
//! concurrent writer blocks until the in-flight write completes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;

use crate::signal::SignalingFrame;

/// WebSocket close code: peer navigated away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code: connection dropped without a close handshake.
/// Never sent on the wire; transports synthesize it for abrupt disconnects.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection closed (code {code})")]
    Closed { code: u16 },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    /// Going-away and abnormal-closure closes are routine client departures
    /// and stay silent; every other failure is logged at error level.
    pub fn is_expected_close(&self) -> bool {
        matches!(
            self,
            Self::Closed { code } if *code == CLOSE_GOING_AWAY || *code == CLOSE_ABNORMAL
        )
    }
}

#[async_trait]
pub trait FrameSender: Send + Sync {
    async fn send(&self, frame: &SignalingFrame) -> Result<(), TransportError>;

    /// Best-effort close of the write side.
    async fn close(&self);
}

#[async_trait]
pub trait FrameReceiver: Send {
    /// The next inbound frame. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<SignalingFrame, TransportError>>;
}

/// Inbound signaling pump: drains a receiver on its own task and hands frames
/// to the owning select loop over a channel. Channel closure is the stop
/// signal; unexpected read failures are logged here.
pub fn spawn_reader(mut source: Box<dyn FrameReceiver>) -> mpsc::Receiver<SignalingFrame> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            match source.recv().await {
                Some(Ok(frame)) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    if !e.is_expected_close() {
                        error!(error = %e, "signaling read failed");
                    }
                    break;
                }
                None => break,
            }
        }
    });
    rx
}
