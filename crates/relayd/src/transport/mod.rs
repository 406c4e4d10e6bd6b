//! Abstract full-duplex frame transport.
//!
//! The hub never talks to a socket directly. A [`Transport`] is split once
//! into a [`FrameSink`] (owned by the connection's outbound loop) and a
//! [`FrameSource`] (owned by the inbound loop), so each half has exactly
//! one owner.
//!
//! Two implementations ship with the crate:
//! - `WebSocketTransport` - an upgraded axum WebSocket
//! - `MemoryTransport` - an in-process pair used by tests and embedders

mod memory;
mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::{WebSocketSink, WebSocketSource, WebSocketTransport};

use async_trait::async_trait;
use thiserror::Error;

/// A single transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame carrying one JSON message
    Text(String),
    /// Binary frame (not used by the protocol, ignored on receipt)
    Binary(Vec<u8>),
    /// Protocol-level ping
    Ping(Vec<u8>),
    /// Protocol-level pong
    Pong(Vec<u8>),
    /// Peer is closing the connection
    Close,
}

impl Frame {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close => "close",
        }
    }
}

/// Errors surfaced by a transport half.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("write timed out")]
    WriteTimeout,
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Writes one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the transport. Implementations must tolerate repeated calls.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Waits for the next frame. Returns `TransportError::Closed` once the
    /// peer has gone away.
    async fn recv(&mut self) -> Result<Frame, TransportError>;
}

/// A full-duplex connection that can be split into owned halves.
pub trait Transport: Send + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    fn split(self) -> (Self::Sink, Self::Source);
}
