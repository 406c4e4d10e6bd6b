//! Type-safe identifiers for users and connections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

// ============================================================================
// User Identity
// ============================================================================

/// Numeric identity bound to a connection after authentication.
///
/// Zero is reserved to mean "not yet authenticated" and can never be
/// constructed through [`UserId::new`], so a `UserId` held by the registry
/// always refers to a verified user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct UserId(u64);

impl UserId {
    /// Creates a user id, rejecting the reserved zero value.
    pub fn new(id: u64) -> DomainResult<Self> {
        if id == 0 {
            return Err(DomainError::InvalidUserId {
                value: id.to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u64>()
            .map_err(|_| DomainError::InvalidUserId {
                value: s.to_string(),
            })?;
        Self::new(value)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl TryFrom<u64> for UserId {
    type Error = DomainError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ============================================================================
// Connection Identity
// ============================================================================

/// Process-unique identifier for a single connection actor.
///
/// Several connections may belong to the same [`UserId`] over time; the
/// registry compares `ConnectionId`s to tell a superseded connection from
/// the one currently registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
