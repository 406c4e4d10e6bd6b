//! The hub facade.
//!
//! `Hub` is what the HTTP layer and business code hold. It admits
//! connections (with or without the in-band handshake) and exposes the
//! non-blocking dispatch API. Every dispatch call returns immediately: a
//! saturated registry queue drops the request and reports it instead of
//! stalling the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_core::{
    AccountStatusChange, ChannelName, ConnectionId, DispatchRequest, SubscriptionSet,
    SystemNotice, TaskUpdate, UserId, ACCOUNT_STATUS, DEFAULT_CHANNELS, SYSTEM_NOTICES,
    TASK_UPDATES,
};
use relay_protocol::ServerMessage;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::auth::{build_verifier, AuthError, CredentialVerifier};
use crate::config::{ConfigError, RelayConfig};
use crate::connection::handshake::{self, HandshakeError};
use crate::connection::{
    control_frame, write_frame, ConnectionHandle, ConnectionSettings, InboundLoop, Mailbox,
    OutboundLoop,
};
use crate::registry::{
    spawn_registry, HubStats, Registration, RegistryError, RegistryEvent, RegistryHandle,
    RegistrySettings,
};
use crate::transport::{FrameSink, FrameSource, Transport, TransportError};

/// Why a dispatch was not queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The registry is saturated; the request was dropped.
    #[error("hub queue is full, notification dropped")]
    QueueFull,

    #[error("hub is stopped")]
    HubStopped,

    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Why a connection was not admitted.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("registration refused: {0}")]
    Registry(#[from] RegistryError),

    #[error("transport failed during admission: {0}")]
    Transport(#[from] TransportError),
}

/// Snapshot reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    pub active_connections: usize,
    pub channels: Vec<String>,
    pub stats: HubStats,
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    settings: ConnectionSettings,
    verifier: Arc<dyn CredentialVerifier>,
    registry: RegistryHandle,
    channels: Vec<ChannelName>,
    next_connection_id: AtomicU64,
}

/// Builder for [`Hub`].
pub struct HubBuilder {
    verifier: Arc<dyn CredentialVerifier>,
    settings: ConnectionSettings,
    registry: RegistrySettings,
    channels: Vec<ChannelName>,
}

impl HubBuilder {
    pub fn connection_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry_settings(mut self, settings: RegistrySettings) -> Self {
        self.registry = settings;
        self
    }

    pub fn channels(mut self, channels: Vec<ChannelName>) -> Self {
        self.channels = channels;
        self
    }

    /// Spawns the registry actor. Must be called inside a tokio runtime.
    pub fn build(self) -> Hub {
        Hub {
            inner: Arc::new(HubInner {
                settings: self.settings,
                verifier: self.verifier,
                registry: spawn_registry(self.registry),
                channels: self.channels,
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Hub {
    pub fn builder(verifier: Arc<dyn CredentialVerifier>) -> HubBuilder {
        HubBuilder {
            verifier,
            settings: ConnectionSettings::default(),
            registry: RegistrySettings::default(),
            channels: DEFAULT_CHANNELS
                .iter()
                .filter_map(|name| ChannelName::new(*name).ok())
                .collect(),
        }
    }

    /// Builds a hub from validated configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        let verifier = build_verifier(&config.auth)
            .map_err(|e| ConfigError::Invalid(format!("auth: {e}")))?;
        Ok(Self::builder(verifier)
            .connection_settings(config.connection_settings())
            .registry_settings(config.registry_settings())
            .channels(config.channel_names()?)
            .build())
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Runs the in-band handshake on a fresh transport, then admits it.
    pub async fn accept<T: Transport>(&self, transport: T) -> Result<ConnectionId, AdmitError> {
        let settings = &self.inner.settings;
        let (mut sink, mut source) = transport.split();

        match handshake::authenticate(&mut sink, &mut source, self.inner.verifier.as_ref(), settings)
            .await
        {
            Ok(user_id) => self.admit(user_id, sink, source).await,
            Err(e) => {
                match &e {
                    HandshakeError::Timeout(_) => info!(error = %e, "Handshake failed"),
                    _ => debug!(error = %e, "Handshake failed"),
                }
                handshake::reject(&mut sink, &e.to_string(), settings.write_wait).await;
                Err(e.into())
            }
        }
    }

    /// Admits a transport whose identity was verified out of band (for
    /// example from a query parameter before the upgrade).
    pub async fn register_connection<T: Transport>(
        &self,
        user_id: UserId,
        transport: T,
    ) -> Result<ConnectionId, AdmitError> {
        let (sink, source) = transport.split();
        self.admit(user_id, sink, source).await
    }

    async fn admit<S, R>(
        &self,
        user_id: UserId,
        mut sink: S,
        source: R,
    ) -> Result<ConnectionId, AdmitError>
    where
        S: FrameSink,
        R: FrameSource,
    {
        let settings = &self.inner.settings;
        let connection_id =
            ConnectionId::new(self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed));

        let (mailbox, receiver) = Mailbox::channel(settings.mailbox_capacity);
        let (subscriptions, subscriptions_rx) = watch::channel(SubscriptionSet::new());
        let handle = ConnectionHandle::new(connection_id, user_id, mailbox, subscriptions_rx);

        let registration = match self.inner.registry.register(handle.clone()).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(%user_id, %connection_id, error = %e, "Registration refused");
                handshake::reject(&mut sink, &e.to_string(), settings.write_wait).await;
                return Err(e.into());
            }
        };

        // Written before the outbound loop starts so it precedes any event
        let written = match control_frame(&ServerMessage::auth_success(user_id)) {
            Ok(frame) => write_frame(&mut sink, frame, settings.write_wait).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!(%user_id, %connection_id, error = %e, "Could not deliver auth_success");
            self.inner.registry.unregister(handle).await;
            if let Err(e) = sink.close().await {
                trace!(%user_id, %connection_id, error = %e, "Error closing transport");
            }
            return Err(e.into());
        }

        tokio::spawn(
            OutboundLoop::new(
                connection_id,
                sink,
                receiver,
                settings.ping_period,
                settings.write_wait,
            )
            .run(),
        );
        tokio::spawn(
            InboundLoop::new(
                handle,
                source,
                subscriptions,
                self.inner.registry.clone(),
                settings,
            )
            .run(),
        );

        info!(
            %user_id,
            %connection_id,
            superseded = matches!(registration, Registration::Superseded(_)),
            "Connection admitted"
        );
        Ok(connection_id)
    }

    /// Verifies a credential without touching the registry.
    pub async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.inner.verifier.verify(token).await
    }

    // ========================================================================
    // Dispatch API
    // ========================================================================

    /// Queues a dispatch without waiting.
    pub fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let message_type = request.message_type.clone();
        self.inner.registry.try_dispatch(request).map_err(|e| match e {
            RegistryError::QueueFull => {
                warn!(message_type = %message_type, "Hub queue full, dropping notification");
                DispatchError::QueueFull
            }
            _ => DispatchError::HubStopped,
        })
    }

    /// Sends an event to one user's live connection, if any.
    pub fn send_to_user(
        &self,
        user_id: UserId,
        message_type: impl Into<String>,
        payload: Value,
    ) -> Result<(), DispatchError> {
        self.dispatch(DispatchRequest::to_user(user_id, message_type, payload))
    }

    /// Sends an event to every live connection.
    pub fn broadcast(&self, message_type: impl Into<String>, payload: Value) -> Result<(), DispatchError> {
        self.dispatch(DispatchRequest::broadcast(message_type, payload))
    }

    /// Sends an event to every connection subscribed to any of `channels`.
    pub fn broadcast_to_channels(
        &self,
        message_type: impl Into<String>,
        payload: Value,
        channels: impl IntoIterator<Item = ChannelName>,
    ) -> Result<(), DispatchError> {
        self.dispatch(DispatchRequest::broadcast(message_type, payload).with_channels(channels))
    }

    /// Pushes a task update to its owner, if subscribed to `task_updates`.
    pub fn notify_task_update(&self, user_id: UserId, update: &TaskUpdate) -> Result<(), DispatchError> {
        let request = DispatchRequest::to_user(user_id, TaskUpdate::EVENT_TYPE, encode(update)?)
            .with_channels([well_known(TASK_UPDATES)?]);
        self.dispatch(request)
    }

    /// Pushes an account status change to its owner, if subscribed to
    /// `account_status`.
    pub fn notify_account_status(
        &self,
        user_id: UserId,
        change: &AccountStatusChange,
    ) -> Result<(), DispatchError> {
        let request =
            DispatchRequest::to_user(user_id, AccountStatusChange::EVENT_TYPE, encode(change)?)
                .with_channels([well_known(ACCOUNT_STATUS)?]);
        self.dispatch(request)
    }

    /// Broadcasts a notice to every connection subscribed to `system_notices`.
    pub fn notify_system(&self, notice: &SystemNotice) -> Result<(), DispatchError> {
        let request = DispatchRequest::broadcast(SystemNotice::EVENT_TYPE, encode(notice)?)
            .with_channels([well_known(SYSTEM_NOTICES)?]);
        self.dispatch(request)
    }

    // ========================================================================
    // Introspection and lifecycle
    // ========================================================================

    pub async fn status(&self) -> Result<HubStatus, RegistryError> {
        let stats = self.inner.registry.stats().await?;
        Ok(HubStatus {
            active_connections: stats.active_connections,
            channels: self.channel_names(),
            stats,
        })
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.registry.is_online(user_id).await
    }

    /// Channel names advertised to clients.
    pub fn channel_names(&self) -> Vec<String> {
        self.inner
            .channels
            .iter()
            .map(|c| c.as_str().to_string())
            .collect()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.registry.subscribe()
    }

    /// Closes every live connection and refuses new ones.
    pub async fn shutdown(&self) -> usize {
        let closed = self.inner.registry.shutdown().await;
        info!(closed, "Hub shut down");
        closed
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(payload).map_err(|e| DispatchError::Encode(e.to_string()))
}

fn well_known(name: &str) -> Result<ChannelName, DispatchError> {
    ChannelName::new(name).map_err(|e| DispatchError::Encode(e.to_string()))
}
