//! In-process transport pair.
//!
//! `MemoryTransport::pair()` returns the server side (a [`Transport`]) and a
//! [`MemoryPeer`] that plays the client. The server-to-client direction is
//! bounded so a peer that stops reading eventually stalls writes, which is
//! how write deadlines are exercised without a real socket.
//!
//! Like a WebSocket library, the source answers protocol pings itself and
//! still hands the ping up so the reader can count it as liveness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Frame, FrameSink, FrameSource, Transport, TransportError};

/// Default capacity of the server-to-client queue.
const DEFAULT_PEER_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct SharedState {
    closed: CancellationToken,
    close_calls: AtomicUsize,
}

/// Server side of an in-memory connection.
pub struct MemoryTransport {
    to_peer: mpsc::Sender<Frame>,
    from_peer: mpsc::UnboundedReceiver<Frame>,
    state: Arc<SharedState>,
}

impl MemoryTransport {
    /// Creates a connected (server, client) pair.
    pub fn pair() -> (Self, MemoryPeer) {
        Self::pair_with_buffer(DEFAULT_PEER_BUFFER)
    }

    /// Creates a pair whose server-to-client queue holds `buffer` frames.
    pub fn pair_with_buffer(buffer: usize) -> (Self, MemoryPeer) {
        let (to_peer, from_server) = mpsc::channel(buffer.max(1));
        let (to_server, from_peer) = mpsc::unbounded_channel();
        let state = Arc::new(SharedState::default());

        (
            Self {
                to_peer,
                from_peer,
                state: Arc::clone(&state),
            },
            MemoryPeer {
                to_server: Some(to_server),
                from_server,
                state,
            },
        )
    }
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            MemorySink {
                to_peer: self.to_peer.clone(),
                state: Arc::clone(&self.state),
            },
            MemorySource {
                from_peer: self.from_peer,
                to_peer: self.to_peer,
                state: self.state,
            },
        )
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemorySink {
    to_peer: mpsc::Sender<Frame>,
    state: Arc<SharedState>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.state.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.to_peer
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.cancel();
        Ok(())
    }
}

/// Read half of a [`MemoryTransport`].
pub struct MemorySource {
    from_peer: mpsc::UnboundedReceiver<Frame>,
    /// Used only for automatic pong replies
    to_peer: mpsc::Sender<Frame>,
    state: Arc<SharedState>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Frame, TransportError> {
        let frame = tokio::select! {
            biased;
            _ = self.state.closed.cancelled() => return Err(TransportError::Closed),
            frame = self.from_peer.recv() => frame.ok_or(TransportError::Closed)?,
        };

        if let Frame::Ping(data) = &frame {
            // Best effort, as with a WebSocket whose peer stopped reading
            if let Err(e) = self.to_peer.try_send(Frame::Pong(data.clone())) {
                trace!(error = %e, "Could not queue pong");
            }
        }
        Ok(frame)
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Frame>>,
    from_server: mpsc::Receiver<Frame>,
    state: Arc<SharedState>,
}

impl MemoryPeer {
    /// Sends a frame to the server. Fails once the peer has disconnected or
    /// the server has closed the transport.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.state.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match &self.to_server {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    /// Sends a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Frame::Text(text.into()))
    }

    /// Receives the next frame written by the server, or `None` once the
    /// server has closed and every written frame has been read.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.state.closed.is_cancelled() {
            return self.from_server.try_recv().ok();
        }
        tokio::select! {
            frame = self.from_server.recv() => frame,
            _ = self.state.closed.cancelled() => self.from_server.try_recv().ok(),
        }
    }

    /// Simulates the client dropping the connection.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Resolves once the server has closed the transport.
    pub async fn closed(&self) {
        self.state.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    /// Number of times the server called `close` on its sink.
    pub fn close_count(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();

        peer.send_text("hello").unwrap();
        assert_eq!(source.recv().await.unwrap(), Frame::Text("hello".into()));

        sink.send(Frame::Text("world".into())).await.unwrap();
        assert_eq!(peer.recv().await, Some(Frame::Text("world".into())));
    }

    #[tokio::test]
    async fn test_close_ends_both_directions() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();

        sink.send(Frame::Text("last".into())).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(source.recv().await, Err(TransportError::Closed));
        assert_eq!(sink.send(Frame::Close).await, Err(TransportError::Closed));
        // Frames written before close are still readable
        assert_eq!(peer.recv().await, Some(Frame::Text("last".into())));
        assert_eq!(peer.recv().await, None);
        assert!(peer.send_text("late").is_err());
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_ping_is_answered_once_by_the_transport() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (_sink, mut source) = transport.split();

        peer.send(Frame::Ping(vec![7])).unwrap();
        assert_eq!(source.recv().await.unwrap(), Frame::Ping(vec![7]));

        assert_eq!(peer.recv().await, Some(Frame::Pong(vec![7])));
        peer.send_text("after").unwrap();
        source.recv().await.unwrap();
        assert!(peer.from_server.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_disconnect() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (_sink, mut source) = transport.split();

        peer.disconnect();
        assert_eq!(source.recv().await, Err(TransportError::Closed));
    }
}
