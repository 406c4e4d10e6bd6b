//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Identity zero is reserved for "not authenticated"
    #[error("Invalid user id: {value} (expected a non-zero integer)")]
    InvalidUserId { value: String },

    /// Channel name failed validation
    #[error("Invalid channel name '{name}': {reason}")]
    InvalidChannel { name: String, reason: String },

    /// A connection tried to hold more subscriptions than allowed
    #[error("Subscription limit reached ({max} channels)")]
    SubscriptionLimit { max: usize },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
