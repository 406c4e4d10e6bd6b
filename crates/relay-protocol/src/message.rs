//! Server-to-client frame types.

use relay_core::{ChannelName, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control frames sent by the hub.
///
/// Serialized adjacently tagged: `{"type": "auth_success", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent immediately on accept; the client must answer with `auth`
    AuthRequired {
        /// Human-readable prompt
        message: String,
        /// Seconds the client has to authenticate
        timeout_secs: u64,
    },

    /// Authentication succeeded and the connection is admitted
    AuthSuccess {
        /// The identity bound to this connection
        user_id: UserId,
    },

    /// Authentication failed; the hub closes the connection after this frame
    AuthFailed {
        /// Reason for the failure
        message: String,
    },

    /// Acknowledges a `subscribe` request
    Subscribed {
        /// Channels now subscribed
        channels: Vec<ChannelName>,
    },

    /// Acknowledges an `unsubscribe` request
    Unsubscribed {
        /// Channels removed
        channels: Vec<ChannelName>,
    },

    /// Reply to an application-level `ping`
    Pong {
        /// Server time, unix seconds
        timestamp: i64,
    },

    /// A request could not be honored; the connection stays open
    Error {
        /// Error message
        message: String,
    },
}

impl ServerMessage {
    /// Creates the initial authentication prompt.
    pub fn auth_required(timeout_secs: u64) -> Self {
        Self::AuthRequired {
            message: "authentication required".to_string(),
            timeout_secs,
        }
    }

    pub fn auth_success(user_id: UserId) -> Self {
        Self::AuthSuccess { user_id }
    }

    pub fn auth_failed(message: &str) -> Self {
        Self::AuthFailed {
            message: message.to_string(),
        }
    }

    pub fn subscribed(channels: Vec<ChannelName>) -> Self {
        Self::Subscribed { channels }
    }

    pub fn unsubscribed(channels: Vec<ChannelName>) -> Self {
        Self::Unsubscribed { channels }
    }

    pub fn pong(timestamp: i64) -> Self {
        Self::Pong { timestamp }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Wire name of this frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired { .. } => "auth_required",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthFailed { .. } => "auth_failed",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A business event frame: `{"type": <message_type>, "data": <payload>}`.
///
/// Clients can also decode any control frame as an envelope and inspect
/// `event_type` before interpreting `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
