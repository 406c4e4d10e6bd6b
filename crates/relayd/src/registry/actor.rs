//! Registry actor - owns the live-connection map and performs fan-out.
//!
//! The RegistryActor is the single owner of the connection map. It receives
//! commands via an mpsc channel, handles them one at a time, and publishes
//! events via broadcast. Because dispatches are handled in arrival order and
//! enqueued without waiting, two dispatches for the same connection always
//! land in its mailbox in submission order.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic
//! - A slow or dead connection never blocks the loop

use std::collections::HashMap;

use relay_core::{DispatchRequest, Target, UserId};
use relay_protocol::EventEnvelope;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::commands::{
    DisconnectReason, HubStats, Registration, RegistryCommand, RegistryError, RegistryEvent,
};
use crate::connection::{ConnectionHandle, DeliveryError};
use crate::transport::Frame;

// ============================================================================
// Resource Limits
// ============================================================================

/// Default maximum number of live connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all connection state.
///
/// # Ownership
///
/// `connections` maps each identity to its single live connection. Nothing
/// outside this task reads or writes it.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    connections: HashMap<UserId, ConnectionHandle>,
    event_publisher: broadcast::Sender<RegistryEvent>,
    max_connections: usize,
    stats: HubStats,
    shutting_down: bool,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        max_connections: usize,
    ) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
            event_publisher,
            max_connections,
            stats: HubStats::default(),
            shutting_down: false,
        }
    }

    /// Runs the actor event loop until every command sender is dropped.
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        // Nobody can reach these connections any more
        for connection in self.connections.values() {
            connection.close();
        }

        info!(
            "Registry actor stopped (connections: {})",
            self.connections.len()
        );
    }

    /// Dispatches a command to the appropriate handler.
    pub(crate) fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                connection,
                respond_to,
            } => {
                let result = self.handle_register(connection);
                // Ignore send error - caller may have given up
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister { connection } => {
                self.handle_unregister(connection);
            }
            RegistryCommand::Dispatch { request } => {
                self.handle_dispatch(*request);
            }
            RegistryCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            RegistryCommand::IsOnline {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.connections.contains_key(&user_id));
            }
            RegistryCommand::SweepClosed => {
                self.handle_sweep_closed();
            }
            RegistryCommand::Shutdown { respond_to } => {
                let closed = self.handle_shutdown();
                let _ = respond_to.send(closed);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, connection: ConnectionHandle) -> Result<Registration, RegistryError> {
        if self.shutting_down {
            connection.close();
            return Err(RegistryError::ShuttingDown);
        }

        let user_id = connection.user_id();
        let connection_id = connection.id();

        match self.connections.get(&user_id) {
            Some(current) if current.id() == connection_id => {
                debug!(%user_id, %connection_id, "Connection already registered");
                return Ok(Registration::New);
            }
            Some(_) => {}
            None if self.connections.len() >= self.max_connections => {
                warn!(
                    %user_id,
                    current = self.connections.len(),
                    max = self.max_connections,
                    "Registry is full, rejecting registration"
                );
                return Err(RegistryError::RegistryFull {
                    max: self.max_connections,
                });
            }
            None => {}
        }

        let previous = self.connections.insert(user_id, connection);
        let _ = self.event_publisher.send(RegistryEvent::Connected {
            user_id,
            connection_id,
        });

        match previous {
            Some(previous) => {
                previous.close();
                info!(
                    %user_id,
                    %connection_id,
                    superseded = %previous.id(),
                    "Connection registered, superseding previous connection"
                );
                let _ = self.event_publisher.send(RegistryEvent::Disconnected {
                    user_id,
                    connection_id: previous.id(),
                    reason: DisconnectReason::Superseded,
                });
                Ok(Registration::Superseded(previous.id()))
            }
            None => {
                info!(
                    %user_id,
                    %connection_id,
                    active = self.connections.len(),
                    "Connection registered"
                );
                Ok(Registration::New)
            }
        }
    }

    fn handle_unregister(&mut self, connection: ConnectionHandle) {
        connection.close();

        let user_id = connection.user_id();
        let connection_id = connection.id();

        let is_current = self
            .connections
            .get(&user_id)
            .is_some_and(|current| current.id() == connection_id);

        if !is_current {
            // Superseded or already removed
            debug!(%user_id, %connection_id, "Ignoring unregister for stale connection");
            return;
        }

        self.connections.remove(&user_id);
        info!(
            %user_id,
            %connection_id,
            active = self.connections.len(),
            "Connection unregistered"
        );
        let _ = self.event_publisher.send(RegistryEvent::Disconnected {
            user_id,
            connection_id,
            reason: DisconnectReason::Closed,
        });
    }

    fn handle_dispatch(&mut self, request: DispatchRequest) {
        self.stats.dispatched += 1;

        let text = match EventEnvelope::new(request.message_type.as_str(), request.payload).to_json()
        {
            Ok(text) => text,
            Err(e) => {
                warn!(message_type = %request.message_type, error = %e, "Failed to encode event");
                return;
            }
        };

        let recipients: Vec<&ConnectionHandle> = match request.target {
            Target::User(user_id) => self.connections.get(&user_id).into_iter().collect(),
            Target::All => self.connections.values().collect(),
        };

        if recipients.is_empty() {
            trace!(message_type = %request.message_type, target = ?request.target, "No recipients online");
            return;
        }

        for connection in recipients {
            if !connection.should_deliver(&request.channels) {
                self.stats.filtered += 1;
                continue;
            }

            match connection.deliver(Frame::Text(text.clone())) {
                Ok(()) => self.stats.delivered += 1,
                Err(DeliveryError::Full) => {
                    self.stats.dropped += 1;
                    warn!(
                        user_id = %connection.user_id(),
                        connection_id = %connection.id(),
                        message_type = %request.message_type,
                        "Mailbox full, dropping event"
                    );
                    let _ = self.event_publisher.send(RegistryEvent::Dropped {
                        user_id: connection.user_id(),
                        connection_id: connection.id(),
                        message_type: request.message_type.clone(),
                    });
                }
                Err(DeliveryError::Closed) => {
                    // Torn down; its unregister is on the way
                    self.stats.dropped += 1;
                    debug!(
                        user_id = %connection.user_id(),
                        connection_id = %connection.id(),
                        "Mailbox closed, skipping"
                    );
                }
            }
        }
    }

    fn handle_sweep_closed(&mut self) {
        let closed: Vec<UserId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_closed())
            .map(|(user_id, _)| *user_id)
            .collect();

        for user_id in closed {
            if let Some(connection) = self.connections.remove(&user_id) {
                debug!(%user_id, connection_id = %connection.id(), "Swept closed connection");
                let _ = self.event_publisher.send(RegistryEvent::Disconnected {
                    user_id,
                    connection_id: connection.id(),
                    reason: DisconnectReason::Closed,
                });
            }
        }
    }

    fn handle_shutdown(&mut self) -> usize {
        self.shutting_down = true;
        let count = self.connections.len();

        for (user_id, connection) in self.connections.drain() {
            connection.close();
            let _ = self.event_publisher.send(RegistryEvent::Disconnected {
                user_id,
                connection_id: connection.id(),
                reason: DisconnectReason::Shutdown,
            });
        }

        info!(closed = count, "Registry shut down");
        count
    }

    fn stats(&self) -> HubStats {
        HubStats {
            active_connections: self.connections.len(),
            ..self.stats
        }
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Mailbox, MailboxReceiver};
    use relay_core::{ChannelName, ConnectionId, SubscriptionSet};
    use serde_json::json;
    use tokio::sync::{oneshot, watch};

    struct TestConnection {
        handle: ConnectionHandle,
        receiver: MailboxReceiver,
        subscriptions: watch::Sender<SubscriptionSet>,
    }

    fn connection(id: u64, user: u64, capacity: usize) -> TestConnection {
        let (mailbox, receiver) = Mailbox::channel(capacity);
        let (subscriptions, subs_rx) = watch::channel(SubscriptionSet::new());
        TestConnection {
            handle: ConnectionHandle::new(
                ConnectionId::new(id),
                UserId::new(user).unwrap(),
                mailbox,
                subs_rx,
            ),
            receiver,
            subscriptions,
        }
    }

    fn create_actor(max: usize) -> (RegistryActor, broadcast::Receiver<RegistryEvent>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(64);
        (RegistryActor::new(cmd_rx, event_tx, max), event_rx)
    }

    async fn register(
        actor: &mut RegistryActor,
        handle: &ConnectionHandle,
    ) -> Result<Registration, RegistryError> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            connection: handle.clone(),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    fn dispatch(actor: &mut RegistryActor, request: DispatchRequest) {
        actor.handle_command(RegistryCommand::Dispatch {
            request: Box::new(request),
        });
    }

    #[tokio::test]
    async fn test_register_publishes_connected() {
        let (mut actor, mut events) = create_actor(10);
        let conn = connection(1, 42, 4);

        assert_eq!(register(&mut actor, &conn.handle).await, Ok(Registration::New));
        assert_eq!(actor.connection_count(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            RegistryEvent::Connected { .. }
        ));
    }

    #[tokio::test]
    async fn test_register_same_user_supersedes_and_closes_previous() {
        let (mut actor, _events) = create_actor(10);
        let first = connection(1, 42, 4);
        let second = connection(2, 42, 4);

        register(&mut actor, &first.handle).await.unwrap();
        let result = register(&mut actor, &second.handle).await;

        assert_eq!(result, Ok(Registration::Superseded(ConnectionId::new(1))));
        assert_eq!(actor.connection_count(), 1);
        assert!(first.handle.is_closed());
        assert!(!second.handle.is_closed());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_connection() {
        let (mut actor, _events) = create_actor(10);
        let first = connection(1, 42, 4);
        let second = connection(2, 42, 4);

        register(&mut actor, &first.handle).await.unwrap();
        register(&mut actor, &second.handle).await.unwrap();
        actor.handle_command(RegistryCommand::Unregister {
            connection: first.handle.clone(),
        });

        assert_eq!(actor.connection_count(), 1);
        assert!(!second.handle.is_closed());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_harmless() {
        let (mut actor, _events) = create_actor(10);
        let conn = connection(1, 42, 4);

        register(&mut actor, &conn.handle).await.unwrap();
        for _ in 0..2 {
            actor.handle_command(RegistryCommand::Unregister {
                connection: conn.handle.clone(),
            });
        }

        assert_eq!(actor.connection_count(), 0);
        assert!(conn.handle.is_closed());
    }

    #[tokio::test]
    async fn test_capacity_limit_allows_supersede() {
        let (mut actor, _events) = create_actor(1);
        let first = connection(1, 1, 4);
        let other = connection(2, 2, 4);
        let replacement = connection(3, 1, 4);

        register(&mut actor, &first.handle).await.unwrap();
        assert_eq!(
            register(&mut actor, &other.handle).await,
            Err(RegistryError::RegistryFull { max: 1 })
        );
        assert!(register(&mut actor, &replacement.handle).await.is_ok());
        assert_eq!(actor.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_serializes_envelope_and_counts() {
        let (mut actor, _events) = create_actor(10);
        let mut conn = connection(1, 42, 4);
        register(&mut actor, &conn.handle).await.unwrap();

        dispatch(
            &mut actor,
            DispatchRequest::to_user(
                UserId::new(42).unwrap(),
                "task_update",
                json!({"task_id": 7, "status": "done"}),
            ),
        );
        dispatch(
            &mut actor,
            DispatchRequest::to_user(UserId::new(99).unwrap(), "task_update", json!({})),
        );

        let Some(Frame::Text(text)) = conn.receiver.recv().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "task_update", "data": {"task_id": 7, "status": "done"}})
        );

        let stats = actor.stats();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.active_connections, 1);
    }

    #[tokio::test]
    async fn test_channel_filter_counts_filtered() {
        let (mut actor, _events) = create_actor(10);
        let conn = connection(1, 42, 4);
        let tasks = ChannelName::new("task_updates").unwrap();
        conn.subscriptions.send_modify(|set| {
            set.subscribe([&tasks]).unwrap();
        });
        register(&mut actor, &conn.handle).await.unwrap();

        dispatch(
            &mut actor,
            DispatchRequest::broadcast("account_status", json!({}))
                .with_channels([ChannelName::new("account_status").unwrap()]),
        );
        dispatch(
            &mut actor,
            DispatchRequest::broadcast("task_update", json!({})).with_channels([tasks]),
        );

        let stats = actor.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(conn.handle.mailbox().len(), 1);
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_and_publishes() {
        let (mut actor, mut events) = create_actor(10);
        let conn = connection(1, 42, 1);
        register(&mut actor, &conn.handle).await.unwrap();
        let _ = events.try_recv();

        dispatch(&mut actor, DispatchRequest::broadcast("a", json!(1)));
        dispatch(&mut actor, DispatchRequest::broadcast("b", json!(2)));

        assert_eq!(actor.stats().dropped, 1);
        match events.try_recv().unwrap() {
            RegistryEvent::Dropped { message_type, .. } => assert_eq!(message_type, "b"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_closed_connections() {
        let (mut actor, _events) = create_actor(10);
        let alive = connection(1, 1, 4);
        let dead = connection(2, 2, 4);
        register(&mut actor, &alive.handle).await.unwrap();
        register(&mut actor, &dead.handle).await.unwrap();

        dead.handle.close();
        actor.handle_command(RegistryCommand::SweepClosed);

        assert_eq!(actor.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_and_refuses_registration() {
        let (mut actor, _events) = create_actor(10);
        let a = connection(1, 1, 4);
        let b = connection(2, 2, 4);
        register(&mut actor, &a.handle).await.unwrap();
        register(&mut actor, &b.handle).await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Shutdown { respond_to: tx });

        assert_eq!(rx.await.unwrap(), 2);
        assert!(a.handle.is_closed());
        assert!(b.handle.is_closed());

        let late = connection(3, 3, 4);
        assert_eq!(
            register(&mut actor, &late.handle).await,
            Err(RegistryError::ShuttingDown)
        );
    }
}
