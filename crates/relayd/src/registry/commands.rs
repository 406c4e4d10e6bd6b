//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for observers
//! - `HubStats`: Counters maintained by the actor

use relay_core::{ConnectionId, DispatchRequest, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::connection::ConnectionHandle;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Commands that need an answer carry a oneshot `respond_to`; the rest are
/// fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a connection, superseding any live connection of the same user.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if a new identity would exceed the cap
    /// - `RegistryError::ShuttingDown` once `Shutdown` has been processed
    Register {
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<Registration, RegistryError>>,
    },

    /// Remove a connection if it is still the current one for its user, and
    /// close its mailbox either way.
    Unregister { connection: ConnectionHandle },

    /// Fan an event out to its recipients.
    ///
    /// The request is boxed to reduce enum size variance.
    Dispatch { request: Box<DispatchRequest> },

    /// Snapshot of the actor's counters.
    GetStats {
        respond_to: oneshot::Sender<HubStats>,
    },

    /// Whether a user currently has a live connection.
    IsOnline {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Drop entries whose mailbox has already closed.
    ///
    /// Fire-and-forget; sent periodically by the sweep task.
    SweepClosed,

    /// Close every connection and refuse further registrations.
    ///
    /// Responds with the number of connections closed.
    Shutdown {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No other live connection existed for the user
    New,
    /// The user's previous connection was superseded and closed
    Superseded(ConnectionId),
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum connection capacity.
    #[error("registry is full (max: {max} connections)")]
    RegistryFull {
        /// Maximum number of connections allowed
        max: usize,
    },

    /// The hub is shutting down.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The actor's command queue is saturated; the request was dropped.
    #[error("registry command queue is full")]
    QueueFull,

    /// The actor has stopped.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A connection was admitted.
    Connected {
        user_id: UserId,
        connection_id: ConnectionId,
    },

    /// A connection left the registry.
    Disconnected {
        user_id: UserId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },

    /// An event was dropped because the recipient's mailbox was full.
    Dropped {
        user_id: UserId,
        connection_id: ConnectionId,
        message_type: String,
    },
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The connection ended (peer close, transport error, liveness timeout)
    Closed,
    /// A newer connection for the same user replaced it
    Superseded,
    /// The hub is shutting down
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Superseded => write!(f, "superseded by a newer connection"),
            Self::Shutdown => write!(f, "hub shutting down"),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters maintained by the registry actor.
///
/// `delivered`, `dropped` and `filtered` count per-recipient outcomes;
/// `dispatched` counts requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub active_connections: usize,
    pub dispatched: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub filtered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::RegistryFull { max: 100 };
        assert_eq!(err.to_string(), "registry is full (max: 100 connections)");

        assert_eq!(
            RegistryError::QueueFull.to_string(),
            "registry command queue is full"
        );
        assert_eq!(
            RegistryError::ChannelClosed.to_string(),
            "response channel closed"
        );
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Closed.to_string(), "connection closed");
        assert_eq!(
            DisconnectReason::Superseded.to_string(),
            "superseded by a newer connection"
        );
        assert_eq!(DisconnectReason::Shutdown.to_string(), "hub shutting down");
    }

    #[test]
    fn test_stats_serialize() {
        let stats = HubStats {
            active_connections: 2,
            dispatched: 3,
            delivered: 4,
            dropped: 1,
            filtered: 0,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["active_connections"], 2);
        assert_eq!(json["dropped"], 1);
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<Registration, RegistryError>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
