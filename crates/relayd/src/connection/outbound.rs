//! Outbound half of a connection actor.
//!
//! Drains the mailbox into the transport and sends a keepalive ping every
//! `ping_period`. This loop is the only owner of the sink, so it is also the
//! only place the transport gets closed.

use std::time::Duration;

use relay_core::ConnectionId;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::{write_frame, MailboxReceiver};

use crate::transport::{Frame, FrameSink, TransportError};

/// Shortest keepalive period; `interval_at` rejects zero.
const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// Why the outbound loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// The mailbox was closed (unregistered, superseded or shut down)
    MailboxClosed,
    /// Writing a queued frame failed
    WriteFailed(TransportError),
    /// Writing a keepalive ping failed
    PingFailed(TransportError),
}

pub struct OutboundLoop<S> {
    connection_id: ConnectionId,
    sink: S,
    mailbox: MailboxReceiver,
    ping_period: Duration,
    write_wait: Duration,
}

impl<S: FrameSink> OutboundLoop<S> {
    pub fn new(
        connection_id: ConnectionId,
        sink: S,
        mailbox: MailboxReceiver,
        ping_period: Duration,
        write_wait: Duration,
    ) -> Self {
        Self {
            connection_id,
            sink,
            mailbox,
            ping_period,
            write_wait,
        }
    }

    /// Runs until the mailbox closes or a write fails, then closes the
    /// mailbox and the transport exactly once.
    pub async fn run(mut self) -> OutboundExit {
        let period = self.ping_period.max(MIN_PING_PERIOD);
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                frame = self.mailbox.recv() => match frame {
                    Some(frame) => {
                        trace!(connection_id = %self.connection_id, kind = frame.kind(), "Writing frame");
                        if let Err(e) = write_frame(&mut self.sink, frame, self.write_wait).await {
                            break OutboundExit::WriteFailed(e);
                        }
                    }
                    None => break OutboundExit::MailboxClosed,
                },
                _ = keepalive.tick() => {
                    if let Err(e) = write_frame(&mut self.sink, Frame::Ping(Vec::new()), self.write_wait).await {
                        break OutboundExit::PingFailed(e);
                    }
                }
            }
        };

        // Wakes the inbound loop if it is still reading
        self.mailbox.close();

        if let Err(e) = self.sink.close().await {
            trace!(connection_id = %self.connection_id, error = %e, "Error closing transport");
        }

        debug!(connection_id = %self.connection_id, exit = ?exit, "Outbound loop stopped");
        exit
    }
}
