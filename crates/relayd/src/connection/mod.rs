//! Connection actors.
//!
//! Each admitted client is served by two cooperating tasks that share
//! nothing but the connection's mailbox:
//!
//! ```text
//!                ┌──────────────┐  try_deliver  ┌──────────────┐
//!  registry ────▶│   Mailbox    │──────────────▶│ OutboundLoop │──▶ FrameSink
//!                └──────────────┘               └──────────────┘
//!                        ▲ acks / pongs
//!                ┌──────────────┐
//!  FrameSource ─▶│ InboundLoop  │──▶ watch<SubscriptionSet> (read by registry)
//!                └──────────────┘──▶ registry.unregister() on teardown
//! ```
//!
//! Before either loop starts, a fresh transport goes through the
//! authentication [`handshake`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport and channel failures end the connection, never the process

pub mod handshake;
mod inbound;
mod mailbox;
mod outbound;

pub use handshake::HandshakeError;
pub use inbound::{InboundExit, InboundLoop};
pub use mailbox::{DeliveryError, Mailbox, MailboxReceiver, DEFAULT_MAILBOX_CAPACITY};
pub use outbound::{OutboundExit, OutboundLoop};

use std::time::Duration;

use relay_core::{ChannelName, ConnectionId, SubscriptionSet, UserId};
use relay_protocol::{ServerMessage, DEFAULT_MAX_FRAME_BYTES};
use tokio::sync::watch;

use crate::transport::{Frame, FrameSink, TransportError};

/// Default transport-level frame ceiling (1 MiB).
pub const DEFAULT_MAX_TRANSPORT_BYTES: usize = 1_048_576;

/// Timing and sizing knobs for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Deadline for the in-band authentication handshake
    pub auth_timeout: Duration,
    /// Silence allowed before the connection is considered dead
    pub pong_wait: Duration,
    /// Interval between keepalive pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Deadline for a single frame write
    pub write_wait: Duration,
    /// Largest inbound text frame accepted; longer frames are dropped and
    /// the connection stays open
    pub max_message_bytes: usize,
    /// Hard ceiling enforced by the transport itself; exceeding it ends the
    /// connection. Must be at least `max_message_bytes`.
    pub max_transport_bytes: usize,
    /// Most channels one connection may subscribe to
    pub max_subscriptions: usize,
    /// Outbound mailbox capacity, in frames
    pub mailbox_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            max_message_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_transport_bytes: DEFAULT_MAX_TRANSPORT_BYTES,
            max_subscriptions: 64,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// The registry's view of a live connection actor.
///
/// Holds only what fan-out needs: identity, the mailbox producer, and a
/// read-only view of the subscription set (written by the actor's inbound
/// loop alone).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    mailbox: Mailbox,
    subscriptions: watch::Receiver<SubscriptionSet>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        mailbox: Mailbox,
        subscriptions: watch::Receiver<SubscriptionSet>,
    ) -> Self {
        Self {
            id,
            user_id,
            mailbox,
            subscriptions,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// True if a dispatch with this channel filter should reach the
    /// connection (empty filter, or any overlap with its subscriptions).
    pub fn should_deliver(&self, filter: &[ChannelName]) -> bool {
        filter.is_empty() || self.subscriptions.borrow().matches(filter)
    }

    /// Snapshot of the current subscriptions.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.borrow().clone()
    }

    /// Queues a frame without waiting.
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.mailbox.try_deliver(frame)
    }

    /// Closes the mailbox, which stops both loops. Idempotent.
    pub fn close(&self) {
        self.mailbox.close();
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Encodes a control message as a text frame.
pub(crate) fn control_frame(message: &ServerMessage) -> Result<Frame, TransportError> {
    message
        .to_json()
        .map(Frame::Text)
        .map_err(|e| TransportError::Io(format!("failed to encode {}: {e}", message.kind())))
}

/// Writes one frame, giving up after `write_wait`.
pub(crate) async fn write_frame<S>(
    sink: &mut S,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), TransportError>
where
    S: FrameSink + ?Sized,
{
    match tokio::time::timeout(write_wait, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout),
    }
}
