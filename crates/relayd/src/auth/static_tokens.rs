//! Fixed token table, typically loaded from `[auth.tokens]`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use relay_core::UserId;

use super::{AuthError, CredentialVerifier};

/// Verifies tokens against an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Builds the table from raw config entries, rejecting user id 0.
    pub fn from_config(tokens: &BTreeMap<String, u64>) -> Result<Self, AuthError> {
        let tokens = tokens
            .iter()
            .map(|(token, id)| {
                UserId::new(*id)
                    .map(|user_id| (token.clone(), user_id))
                    .map_err(|_| AuthError::UnknownUser)
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(AuthError::InvalidToken)
    }
}
