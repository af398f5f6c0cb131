//! axum WebSocket adapters for the core signaling-transport traits.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use parlor_core::signal::SignalingFrame;
use parlor_core::transport::{FrameReceiver, FrameSender, TransportError, CLOSE_ABNORMAL};

/// Close frame with no status code, per RFC 6455.
const CLOSE_NO_STATUS: u16 = 1005;

/// Splits an upgraded socket into the core's transport halves.
pub fn split(socket: WebSocket) -> (Arc<WsFrameSender>, Box<WsFrameReceiver>) {
    let (sink, stream) = socket.split();
    (
        Arc::new(WsFrameSender {
            sink: Mutex::new(sink),
        }),
        Box::new(WsFrameReceiver { stream }),
    )
}

/// Write half. The mutex serializes the concurrent send paths (keepalive,
/// offers, candidates, lobby pushes) onto the single socket.
pub struct WsFrameSender {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl FrameSender for WsFrameSender {
    async fn send(&self, frame: &SignalingFrame) -> Result<(), TransportError> {
        let text = frame
            .encode()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }
}

pub struct WsFrameReceiver {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReceiver for WsFrameReceiver {
    async fn recv(&mut self) -> Option<Result<SignalingFrame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        SignalingFrame::decode(&text)
                            .map_err(|e| TransportError::Malformed(e.to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    let code = frame.map(|f| f.code).unwrap_or(CLOSE_NO_STATUS);
                    return Some(Err(TransportError::Closed { code }));
                }
                // Ping/pong/binary are not signaling frames.
                Ok(_) => continue,
                Err(_) => {
                    // A read failure means the connection dropped without a
                    // close handshake. 1006 is never sent on the wire, so it
                    // is synthesized here for the close classification.
                    return Some(Err(TransportError::Closed {
                        code: CLOSE_ABNORMAL,
                    }));
                }
            }
        }
    }
}
