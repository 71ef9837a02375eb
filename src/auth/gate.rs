use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::identity::Identity;
use crate::auth::policy::{self, Action, Resource};
use crate::error::{AppError, AppResult};
use crate::services::identity::{IdentityProvider, VerifiedToken};

/// Single entry point for "who is this" and "may they do that"
pub struct AuthorizationGate {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl AuthorizationGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Checks a bearer token with the identity provider. A slow provider is
    /// `Unavailable`, never an authentication failure.
    pub async fn authenticate(&self, token: &str) -> AppResult<VerifiedToken> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::InvalidToken("empty token".to_string()));
        }

        self.bounded(self.provider.verify(token)).await
    }

    pub async fn revoke_sessions(&self, uid: &str) -> AppResult<()> {
        self.bounded(self.provider.revoke_sessions(uid)).await
    }

    pub async fn delete_account(&self, uid: &str) -> AppResult<()> {
        self.bounded(self.provider.delete_account(uid)).await
    }

    pub async fn mark_email_verified(&self, uid: &str) -> AppResult<()> {
        self.bounded(self.provider.mark_email_verified(uid)).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Identity provider timed out");
                Err(AppError::Unavailable("identity provider timed out".to_string()))
            }
        }
    }

    pub fn authorize(&self, identity: &Identity, action: Action, resource: &Resource<'_>) -> AppResult<()> {
        policy::authorize(identity, action, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identity::LocalIdentityProvider;
    use async_trait::async_trait;

    struct StalledProvider;

    #[async_trait]
    impl IdentityProvider for StalledProvider {
        async fn verify(&self, _token: &str) -> AppResult<VerifiedToken> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(AppError::Internal("unreachable".to_string()))
        }

        async fn revoke_sessions(&self, _uid: &str) -> AppResult<()> {
            Ok(())
        }

        async fn delete_account(&self, _uid: &str) -> AppResult<()> {
            Ok(())
        }

        async fn mark_email_verified(&self, _uid: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_authenticate_valid_token() {
        let provider = Arc::new(LocalIdentityProvider::new("secret", 1));
        let token = provider.issue("u1", None).unwrap();
        let gate = AuthorizationGate::new(provider, Duration::from_secs(1));

        assert_eq!(gate.authenticate(&token).await.unwrap().uid, "u1");
    }

    #[tokio::test]
    async fn test_malformed_token_is_invalid() {
        let gate = AuthorizationGate::new(
            Arc::new(LocalIdentityProvider::new("secret", 1)),
            Duration::from_secs(1),
        );

        assert!(matches!(
            gate.authenticate("not-a-jwt").await,
            Err(AppError::InvalidToken(_))
        ));
        assert!(matches!(
            gate.authenticate("  ").await,
            Err(AppError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_timeout_is_unavailable() {
        let gate = AuthorizationGate::new(Arc::new(StalledProvider), Duration::from_millis(50));

        assert!(matches!(
            gate.authenticate("token").await,
            Err(AppError::Unavailable(_))
        ));
    }
}
