//! Relay Core - Shared types for the relay push hub
//!
//! This crate provides the domain types shared between the hub daemon
//! (relayd), the wire protocol, and business collaborators that publish
//! notifications.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod identity;

// Re-exports for convenience
pub use channel::{ChannelName, SubscriptionSet, DEFAULT_CHANNELS, MAX_CHANNEL_NAME_LEN};
pub use dispatch::{DispatchRequest, Target};
pub use error::{DomainError, DomainResult};
pub use events::{
    AccountStatusChange, NoticeLevel, SystemNotice, TaskUpdate, ACCOUNT_STATUS, SYSTEM_NOTICES,
    TASK_UPDATES,
};
pub use identity::{ConnectionId, UserId};
