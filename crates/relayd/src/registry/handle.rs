//! Client interface for interacting with the RegistryActor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use relay_core::{DispatchRequest, UserId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::commands::{HubStats, Registration, RegistryCommand, RegistryError, RegistryEvent};
use crate::connection::ConnectionHandle;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// Cheap to clone and shared by every connection actor, the hub facade and
/// the HTTP layer.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// // Admit a connection
/// handle.register(connection).await?;
///
/// // Queue an event without waiting
/// handle.try_dispatch(DispatchRequest::broadcast("system_notice", payload))?;
///
/// // Observe membership changes
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Admits a connection, superseding the user's previous one if any.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    /// - `RegistryError::ShuttingDown` if the hub is stopping
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, connection: ConnectionHandle) -> Result<Registration, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a connection (if still current) and closes its mailbox.
    ///
    /// Fire-and-forget. If the actor is gone the mailbox is closed here.
    pub async fn unregister(&self, connection: ConnectionHandle) {
        if let Err(mpsc::error::SendError(cmd)) = self
            .sender
            .send(RegistryCommand::Unregister { connection })
            .await
        {
            if let RegistryCommand::Unregister { connection } = cmd {
                connection.close();
            }
            debug!("Unregister after registry stopped");
        }
    }

    /// Queues a dispatch without waiting.
    ///
    /// # Errors
    ///
    /// - `RegistryError::QueueFull` if the actor's queue is saturated; the
    ///   request is dropped
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub fn try_dispatch(&self, request: DispatchRequest) -> Result<(), RegistryError> {
        self.sender
            .try_send(RegistryCommand::Dispatch {
                request: Box::new(request),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RegistryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RegistryError::ChannelClosed,
            })
    }

    /// Current counters.
    pub async fn stats(&self) -> Result<HubStats, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Whether a user has a live connection.
    ///
    /// Returns `false` if communication with the actor fails.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::IsOnline {
                user_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Asks the actor to drop entries whose mailbox has closed.
    pub async fn sweep_closed(&self) {
        // Fire-and-forget: ignore send errors (actor may be shutting down)
        let _ = self.sender.send(RegistryCommand::SweepClosed).await;
    }

    /// Closes every connection and refuses further registrations.
    ///
    /// Returns the number of connections closed, or 0 if the actor is gone.
    pub async fn shutdown(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Subscribes to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Mailbox;
    use relay_core::{ConnectionId, SubscriptionSet};
    use serde_json::json;
    use tokio::sync::watch;

    fn create_test_handle(buffer: usize) -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        let (event_tx, _event_rx) = broadcast::channel(16);
        (RegistryHandle::new(cmd_tx, event_tx), cmd_rx)
    }

    fn test_connection() -> ConnectionHandle {
        let (mailbox, _rx) = Mailbox::channel(4);
        let (_tx, subs) = watch::channel(SubscriptionSet::new());
        ConnectionHandle::new(ConnectionId::new(1), UserId::new(7).unwrap(), mailbox, subs)
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (handle, mut rx) = create_test_handle(4);

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Register {
                connection,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(connection.user_id().get(), 7);
                let _ = respond_to.send(Ok(Registration::New));
                return true;
            }
            false
        });

        let result = handle.register(test_connection()).await;
        assert_eq!(result, Ok(Registration::New));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle(4);
        drop(rx);

        let result = handle.register(test_connection()).await;
        assert_eq!(result, Err(RegistryError::ChannelClosed));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_try_dispatch_reports_queue_full() {
        let (handle, _rx) = create_test_handle(1);

        handle
            .try_dispatch(DispatchRequest::broadcast("a", json!({})))
            .unwrap();
        assert_eq!(
            handle.try_dispatch(DispatchRequest::broadcast("b", json!({}))),
            Err(RegistryError::QueueFull)
        );
    }

    #[tokio::test]
    async fn test_unregister_after_stop_still_closes_mailbox() {
        let (handle, rx) = create_test_handle(4);
        drop(rx);

        let connection = test_connection();
        handle.unregister(connection.clone()).await;
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_queries_degrade_when_actor_gone() {
        let (handle, rx) = create_test_handle(4);
        drop(rx);

        assert!(!handle.is_online(UserId::new(7).unwrap()).await);
        assert_eq!(handle.shutdown().await, 0);
        assert_eq!(handle.stats().await, Err(RegistryError::ChannelClosed));
    }
}
