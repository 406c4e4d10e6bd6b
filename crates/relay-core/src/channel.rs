//! Subscription channels and per-connection subscription sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::events::{ACCOUNT_STATUS, SYSTEM_NOTICES, TASK_UPDATES};

/// Longest accepted channel name, in bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Channels advertised by a default hub configuration.
pub const DEFAULT_CHANNELS: &[&str] = &[TASK_UPDATES, ACCOUNT_STATUS, SYSTEM_NOTICES];

// ============================================================================
// Channel Name
// ============================================================================

/// A validated channel (topic) name.
///
/// Accepted characters are ASCII alphanumerics plus `_`, `-`, `.` and `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| DomainError::InvalidChannel {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(invalid("name is too long"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        {
            return Err(invalid("name contains unsupported characters"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

// ============================================================================
// Subscription Set
// ============================================================================

/// The set of channels one connection has opted into.
///
/// Owned and mutated by a single writer (the connection's inbound loop);
/// the registry only ever reads snapshots of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    channels: BTreeSet<ChannelName>,
    max: Option<usize>,
}

impl SubscriptionSet {
    /// Creates an unbounded, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set that holds at most `max` channels.
    pub fn with_limit(max: usize) -> Self {
        Self {
            channels: BTreeSet::new(),
            max: Some(max),
        }
    }

    /// Adds channels, returning the ones now present as a result of this call
    /// (including channels that were already subscribed).
    ///
    /// Stops with `SubscriptionLimit` once the cap is reached; channels added
    /// before that point stay subscribed.
    pub fn subscribe<'a, I>(&mut self, channels: I) -> DomainResult<Vec<ChannelName>>
    where
        I: IntoIterator<Item = &'a ChannelName>,
    {
        let mut applied = Vec::new();
        for channel in channels {
            if !self.channels.contains(channel) {
                if let Some(max) = self.max {
                    if self.channels.len() >= max {
                        return Err(DomainError::SubscriptionLimit { max });
                    }
                }
                self.channels.insert(channel.clone());
            }
            applied.push(channel.clone());
        }
        Ok(applied)
    }

    /// Removes channels, returning the requested names.
    pub fn unsubscribe<'a, I>(&mut self, channels: I) -> Vec<ChannelName>
    where
        I: IntoIterator<Item = &'a ChannelName>,
    {
        channels
            .into_iter()
            .map(|channel| {
                self.channels.remove(channel);
                channel.clone()
            })
            .collect()
    }

    pub fn contains(&self, channel: &ChannelName) -> bool {
        self.channels.contains(channel)
    }

    /// Returns true if a dispatch with this channel filter should reach the
    /// connection: an empty filter always matches, otherwise at least one
    /// filter channel must be subscribed.
    pub fn matches(&self, filter: &[ChannelName]) -> bool {
        filter.is_empty() || filter.iter().any(|c| self.channels.contains(c))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelName> {
        self.channels.iter()
    }
}
