//! Transport over an upgraded axum WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{Frame, FrameSink, FrameSource, Transport, TransportError};

/// An upgraded WebSocket, not yet split.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn split(self) -> (Self::Sink, Self::Source) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketSink {
                inner: sink,
                closed: false,
            },
            WebSocketSource { inner: stream },
        )
    }
}

/// Write half of a WebSocket. `close` is idempotent.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        };

        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The peer may already be gone; the close frame is best effort
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Read half of a WebSocket.
///
/// The WebSocket library queues the pong for an incoming ping on its own;
/// the ping is still surfaced so readers can treat it as liveness.
pub struct WebSocketSource {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Frame, TransportError> {
        match self.inner.next().await {
            Some(Ok(message)) => Ok(match message {
                Message::Text(text) => Frame::Text(text.as_str().to_owned()),
                Message::Binary(data) => Frame::Binary(data.to_vec()),
                Message::Ping(data) => Frame::Ping(data.to_vec()),
                Message::Pong(data) => Frame::Pong(data.to_vec()),
                Message::Close(_) => Frame::Close,
            }),
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }
}
