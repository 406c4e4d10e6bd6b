//! Bounded per-connection outbound queue.
//!
//! Producers (the registry, the connection's own inbound loop) only ever
//! call [`Mailbox::try_deliver`], which never waits. The single consumer is
//! the connection's outbound loop. Closing is signalled through a
//! `CancellationToken` rather than by dropping senders, because several
//! components hold a sender and any of them may decide the connection is
//! finished.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::Frame;

/// Default mailbox capacity, in frames.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The consumer is not keeping up; the frame was dropped.
    #[error("mailbox full")]
    Full,

    /// The connection is shutting down.
    #[error("mailbox closed")]
    Closed,
}

/// Producer side of a connection's mailbox. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

/// Consumer side of a connection's mailbox.
#[derive(Debug)]
pub struct MailboxReceiver {
    receiver: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

impl Mailbox {
    /// Creates a mailbox holding at most `capacity` pending frames.
    pub fn channel(capacity: usize) -> (Mailbox, MailboxReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            Mailbox {
                sender,
                closed: closed.clone(),
            },
            MailboxReceiver { receiver, closed },
        )
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Closes the mailbox. Safe to call any number of times.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the mailbox has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MailboxReceiver {
    /// Waits for the next frame. Returns `None` once the mailbox is closed;
    /// frames still queued at that point are discarded.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.receiver.recv() => frame,
        }
    }

    /// Closes the mailbox from the consumer side.
    pub fn close(&self) {
        self.closed.cancel();
    }
}
