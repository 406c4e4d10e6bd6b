//! Dispatch requests handed from business collaborators to the hub.

use serde_json::Value;

use crate::channel::ChannelName;
use crate::identity::UserId;

/// Who a dispatch is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The single live connection of one user (if any)
    User(UserId),
    /// Every live connection
    All,
}

/// A single outbound event, consumed exactly once by the registry.
///
/// The payload is serialized once by the registry, regardless of how many
/// connections receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub target: Target,
    pub message_type: String,
    pub payload: Value,
    /// Empty means "deliver regardless of subscriptions"
    pub channels: Vec<ChannelName>,
}

impl DispatchRequest {
    /// Creates a unicast request for one user.
    pub fn to_user(user_id: UserId, message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            target: Target::User(user_id),
            message_type: message_type.into(),
            payload,
            channels: Vec::new(),
        }
    }

    /// Creates a request for every connection.
    pub fn broadcast(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            target: Target::All,
            message_type: message_type.into(),
            payload,
            channels: Vec::new(),
        }
    }

    /// Restricts delivery to connections subscribed to any of `channels`.
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = ChannelName>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn is_filtered(&self) -> bool {
        !self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders() {
        let user = UserId::new(9).unwrap();
        let req = DispatchRequest::to_user(user, "task_update", json!({"task_id": 1}));
        assert_eq!(req.target, Target::User(user));
        assert!(!req.is_filtered());

        let req = DispatchRequest::broadcast("system_notice", json!({}))
            .with_channels([ChannelName::new("system_notices").unwrap()]);
        assert_eq!(req.target, Target::All);
        assert!(req.is_filtered());
        assert_eq!(req.channels.len(), 1);
    }
}
