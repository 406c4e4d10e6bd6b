//! Credential verification.
//!
//! The hub never issues or stores credentials itself; it only asks a
//! [`CredentialVerifier`] to map a token to a [`UserId`]. Verifiers are
//! composed at startup from the `[auth]` config section.

mod jwt;
mod static_tokens;

pub use jwt::{Claims, JwtVerifier};
pub use static_tokens::StaticTokenVerifier;

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::UserId;
use thiserror::Error;
use tracing::info;

use crate::config::AuthConfig;

/// Errors produced while verifying a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("token does not name a valid user")]
    UnknownUser,

    #[error("no credential verifier configured")]
    NoVerifier,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Maps a credential to the identity it proves.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Tries each verifier in order; the first success wins.
///
/// When every verifier fails, the most specific error is returned
/// (`Expired` over `UnknownUser` over `InvalidToken`).
#[derive(Default)]
pub struct ChainVerifier {
    verifiers: Vec<Arc<dyn CredentialVerifier>>,
}

impl ChainVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for ChainVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let mut best = AuthError::NoVerifier;
        for verifier in &self.verifiers {
            match verifier.verify(token).await {
                Ok(user_id) => return Ok(user_id),
                Err(e) => {
                    if rank(&e) > rank(&best) {
                        best = e;
                    }
                }
            }
        }
        Err(best)
    }
}

fn rank(err: &AuthError) -> u8 {
    match err {
        AuthError::NoVerifier => 0,
        AuthError::Signing(_) | AuthError::InvalidToken => 1,
        AuthError::UnknownUser => 2,
        AuthError::Expired => 3,
    }
}

/// Builds the verifier chain described by the `[auth]` section: static
/// tokens first, then JWT.
pub fn build_verifier(config: &AuthConfig) -> Result<Arc<dyn CredentialVerifier>, AuthError> {
    let mut chain = ChainVerifier::new();

    if !config.tokens.is_empty() {
        let verifier = StaticTokenVerifier::from_config(&config.tokens)?;
        info!(tokens = verifier.len(), "Static token verifier enabled");
        chain = chain.with(Arc::new(verifier));
    }

    if let Some(secret) = config.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
        let verifier = JwtVerifier::new(secret.as_bytes()).with_leeway(config.jwt_leeway_secs);
        info!("JWT verifier enabled");
        chain = chain.with(Arc::new(verifier));
    }

    Ok(Arc::new(chain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn user(id: u64) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_empty_chain_reports_no_verifier() {
        let chain = ChainVerifier::new();
        assert!(chain.is_empty());
        assert_eq!(chain.verify("anything").await, Err(AuthError::NoVerifier));
    }

    #[tokio::test]
    async fn test_chain_first_success_wins() {
        let chain = ChainVerifier::new()
            .with(Arc::new(StaticTokenVerifier::new([("a".to_string(), user(1))])))
            .with(Arc::new(StaticTokenVerifier::new([
                ("a".to_string(), user(2)),
                ("b".to_string(), user(3)),
            ])));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.verify("a").await, Ok(user(1)));
        assert_eq!(chain.verify("b").await, Ok(user(3)));
        assert_eq!(chain.verify("c").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_build_verifier_from_config() {
        let mut tokens = BTreeMap::new();
        tokens.insert("dev-token".to_string(), 42);
        let config = AuthConfig {
            jwt_secret: Some("secret".to_string()),
            tokens,
            ..AuthConfig::default()
        };

        let verifier = build_verifier(&config).unwrap();
        assert_eq!(verifier.verify("dev-token").await, Ok(user(42)));

        let jwt = JwtVerifier::new(b"secret")
            .issue_token(user(7), Duration::from_secs(60))
            .unwrap();
        assert_eq!(verifier.verify(&jwt).await, Ok(user(7)));
    }

    #[test]
    fn test_build_verifier_rejects_zero_user() {
        let mut tokens = BTreeMap::new();
        tokens.insert("bad".to_string(), 0);
        let config = AuthConfig {
            tokens,
            ..AuthConfig::default()
        };

        assert!(matches!(build_verifier(&config), Err(AuthError::UnknownUser)));
    }
}
