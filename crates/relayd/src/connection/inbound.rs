//! Inbound half of a connection actor.
//!
//! Reads client frames, owns the connection's subscription set, and answers
//! requests through the connection's own mailbox so replies stay ordered
//! with dispatched events. Teardown (unregister plus mailbox close) happens
//! here whichever way the connection ends.

use std::time::Duration;

use chrono::Utc;
use relay_core::SubscriptionSet;
use relay_protocol::{ClientMessage, ProtocolError, ServerMessage};
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::{control_frame, ConnectionHandle, ConnectionSettings};
use crate::registry::RegistryHandle;
use crate::transport::{Frame, FrameSource, TransportError};

/// Why the inbound loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundExit {
    /// The peer sent a close frame or went away
    PeerClosed,
    /// Reading failed
    Transport(TransportError),
    /// Nothing arrived within `pong_wait`
    LivenessTimeout,
    /// The mailbox was closed from elsewhere (superseded, write failure,
    /// hub shutdown)
    MailboxClosed,
}

pub struct InboundLoop<R> {
    handle: ConnectionHandle,
    source: R,
    subscriptions: watch::Sender<SubscriptionSet>,
    registry: RegistryHandle,
    pong_wait: Duration,
    max_message_bytes: usize,
    max_subscriptions: usize,
}

impl<R: FrameSource> InboundLoop<R> {
    pub fn new(
        handle: ConnectionHandle,
        source: R,
        subscriptions: watch::Sender<SubscriptionSet>,
        registry: RegistryHandle,
        settings: &ConnectionSettings,
    ) -> Self {
        Self {
            handle,
            source,
            subscriptions,
            registry,
            pong_wait: settings.pong_wait,
            max_message_bytes: settings.max_message_bytes,
            max_subscriptions: settings.max_subscriptions,
        }
    }

    pub async fn run(mut self) -> InboundExit {
        let mut local = SubscriptionSet::with_limit(self.max_subscriptions);
        let mut deadline = Instant::now() + self.pong_wait;
        let mailbox = self.handle.mailbox().clone();

        let exit = loop {
            let read = tokio::select! {
                biased;
                _ = mailbox.closed() => break InboundExit::MailboxClosed,
                read = timeout_at(deadline, self.source.recv()) => read,
            };

            let frame = match read {
                Err(_) => break InboundExit::LivenessTimeout,
                Ok(Err(TransportError::Closed)) => break InboundExit::PeerClosed,
                Ok(Err(e)) => break InboundExit::Transport(e),
                Ok(Ok(frame)) => frame,
            };

            // Any traffic proves the peer is alive
            deadline = Instant::now() + self.pong_wait;

            match frame {
                Frame::Text(text) => self.handle_text(&text, &mut local),
                // The transport answers pings itself
                Frame::Ping(_) => trace!(connection_id = %self.handle.id(), "Ping received"),
                Frame::Pong(_) => trace!(connection_id = %self.handle.id(), "Pong received"),
                Frame::Binary(_) => {
                    debug!(connection_id = %self.handle.id(), "Ignoring binary frame")
                }
                Frame::Close => break InboundExit::PeerClosed,
            }
        };

        self.registry.unregister(self.handle.clone()).await;
        self.handle.close();

        debug!(
            connection_id = %self.handle.id(),
            user_id = %self.handle.user_id(),
            exit = ?exit,
            "Inbound loop stopped"
        );
        exit
    }

    fn handle_text(&self, text: &str, local: &mut SubscriptionSet) {
        let message = match ClientMessage::parse_with_limit(text, self.max_message_bytes) {
            Ok(message) => message,
            Err(ProtocolError::UnknownType(kind)) => {
                debug!(connection_id = %self.handle.id(), kind = %kind, "Ignoring unknown frame type");
                return;
            }
            Err(e) => {
                warn!(connection_id = %self.handle.id(), error = %e, "Ignoring malformed frame");
                return;
            }
        };

        match message {
            ClientMessage::Subscribe { channels } => {
                let applied = match local.subscribe(&channels) {
                    Ok(applied) => applied,
                    Err(e) => {
                        self.reply(&ServerMessage::error(&e.to_string()));
                        channels
                            .iter()
                            .filter(|c| local.contains(c))
                            .cloned()
                            .collect()
                    }
                };
                self.subscriptions.send_replace(local.clone());
                debug!(
                    connection_id = %self.handle.id(),
                    channels = ?applied,
                    "Subscribed"
                );
                self.reply(&ServerMessage::subscribed(applied));
            }
            ClientMessage::Unsubscribe { channels } => {
                let removed = local.unsubscribe(&channels);
                self.subscriptions.send_replace(local.clone());
                debug!(
                    connection_id = %self.handle.id(),
                    channels = ?removed,
                    "Unsubscribed"
                );
                self.reply(&ServerMessage::unsubscribed(removed));
            }
            ClientMessage::Ping => {
                self.reply(&ServerMessage::pong(Utc::now().timestamp()));
            }
            ClientMessage::Auth { .. } => {
                debug!(connection_id = %self.handle.id(), "Ignoring auth frame on authenticated connection");
            }
        }
    }

    fn reply(&self, message: &ServerMessage) {
        match control_frame(message) {
            Ok(frame) => self.reply_frame(frame),
            Err(e) => warn!(connection_id = %self.handle.id(), error = %e, "Dropping reply"),
        }
    }

    fn reply_frame(&self, frame: Frame) {
        if let Err(e) = self.handle.deliver(frame) {
            warn!(connection_id = %self.handle.id(), error = %e, "Reply dropped");
        }
    }
}
