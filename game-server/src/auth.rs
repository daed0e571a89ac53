//! Session token verification.
//!
//! Token issuance, user accounts and password handling live in an external
//! auth service; this trait is the contract the dispatcher relies on. The
//! default verifier only enforces the configured key shape; deployments
//! plug in a real verifier against their token backend.

use crate::config::SecurityConfig;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns whether the token authenticates the claimed user.
    async fn verify(&self, user_id: Uuid, token: &str) -> bool;
}

/// Shape-only verification driven by the `Security` config keys. With
/// validation disabled (development) every non-empty token passes.
pub struct ApiKeyVerifier {
    security: SecurityConfig,
}

impl ApiKeyVerifier {
    pub fn new(security: SecurityConfig) -> Self {
        Self { security }
    }
}

#[async_trait]
impl TokenVerifier for ApiKeyVerifier {
    async fn verify(&self, _user_id: Uuid, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        if !self.security.enforce_api_key_validation {
            return true;
        }
        token.len() >= self.security.minimum_api_key_length
            && token.chars().all(|c| c.is_ascii_graphic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_tokens_are_rejected_when_enforced() {
        let verifier = ApiKeyVerifier::new(SecurityConfig::default());
        assert!(!verifier.verify(Uuid::nil(), "short").await);
        assert!(
            verifier
                .verify(Uuid::nil(), "0123456789abcdef0123")
                .await
        );
    }

    #[tokio::test]
    async fn empty_tokens_never_pass() {
        let mut security = SecurityConfig::default();
        security.enforce_api_key_validation = false;
        let verifier = ApiKeyVerifier::new(security);
        assert!(!verifier.verify(Uuid::nil(), "").await);
        assert!(verifier.verify(Uuid::nil(), "dev").await);
    }
}
