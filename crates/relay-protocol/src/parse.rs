//! Tolerant parsing of client frames.
//!
//! Client frames are decoded in two steps: first into a loose envelope
//! (`type` plus raw `data`), then into the typed variant for known types.
//! This lets the hub tell an unknown frame type (ignored) apart from a
//! known type with a bad payload (malformed), without either being fatal.

use relay_core::ChannelName;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Default cap on a single inbound text frame (64 KiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Credential for the in-band handshake
    Auth { token: String },
    /// Add channels to the connection's subscription set
    Subscribe { channels: Vec<ChannelName> },
    /// Remove channels from the subscription set
    Unsubscribe { channels: Vec<ChannelName> },
    /// Application-level liveness check
    Ping,
}

/// Errors produced while decoding a client frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct AuthData {
    token: String,
}

#[derive(Deserialize)]
struct ChannelsData {
    #[serde(default)]
    channels: Vec<String>,
}

impl ClientMessage {
    /// Parses a text frame using the default size cap.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::parse_with_limit(text, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Parses a text frame, rejecting frames longer than `max_bytes`.
    pub fn parse_with_limit(text: &str, max_bytes: usize) -> Result<Self, ProtocolError> {
        if text.len() > max_bytes {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                max: max_bytes,
            });
        }

        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match raw.kind.as_str() {
            "auth" => {
                let data: AuthData = decode_data(raw.data)?;
                Ok(Self::Auth { token: data.token })
            }
            "subscribe" => Ok(Self::Subscribe {
                channels: decode_channels(raw.data)?,
            }),
            "unsubscribe" => Ok(Self::Unsubscribe {
                channels: decode_channels(raw.data)?,
            }),
            "ping" => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }

    /// Wire name of this frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
        }
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn decode_channels(data: Value) -> Result<Vec<ChannelName>, ProtocolError> {
    let data: ChannelsData = decode_data(data)?;
    data.channels
        .into_iter()
        .map(|name| ChannelName::new(name).map_err(|e| ProtocolError::Malformed(e.to_string())))
        .collect()
}
