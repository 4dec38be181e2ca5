//! Session verification and access-token refresh
//!
//! Refresh tokens are not rotated: a refresh returns a new access token and
//! the same refresh token stays valid until it expires or falls off the
//! identity's capped token list.

use std::sync::Arc;

use common::Secret;
use tracing::debug;

use crate::error::{Error, Result};
use crate::token::{Claims, TokenIssuer};
use crate::users::{UserRecord, UserStore};

pub struct SessionService {
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
}

impl SessionService {
    pub fn new(issuer: Arc<TokenIssuer>, users: Arc<dyn UserStore>) -> Self {
        Self { issuer, users }
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Claims of a valid access token. Refresh tokens are refused.
    pub fn authenticate(&self, access_token: &str) -> Result<Claims> {
        let claims = self.issuer.verify(access_token)?;
        if claims.is_refresh() {
            return Err(Error::InvalidToken(
                "refresh token used as access token".into(),
            ));
        }
        Ok(claims)
    }

    /// Identity owning a valid refresh token that is still on record.
    pub async fn resolve_refresh(&self, refresh_token: &str) -> Result<UserRecord> {
        let claims = self.issuer.verify(refresh_token)?;
        if !claims.is_refresh() {
            return Err(Error::InvalidToken("not a refresh token".into()));
        }
        let user = self
            .users
            .find_by_email(&claims.sub)
            .await?
            .ok_or_else(|| Error::InvalidToken("unknown subject".into()))?;
        if !user.refresh_tokens.iter().any(|t| t == refresh_token) {
            return Err(Error::InvalidToken("refresh token not on record".into()));
        }
        Ok(user)
    }

    /// New access token for the refresh token's identity, with permissions
    /// resolved from its current role.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Secret<String>> {
        let user = self.resolve_refresh(refresh_token).await?;
        let access = self.issuer.issue_access(&user.email, &user.role)?;
        debug!(email = %user.email, "access token refreshed");
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::resolve;
    use crate::users::LocalUserStore;
    use common::ManualClock;
    use provider::RemoteIdentity;
    use std::time::Duration;

    struct Fixture {
        service: SessionService,
        users: Arc<LocalUserStore>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(max_tokens: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let users = Arc::new(LocalUserStore::in_memory(max_tokens));
        users
            .create(UserRecord::from_identity(
                &RemoteIdentity::from_email("a@b.com"),
                0,
            ))
            .await
            .unwrap();
        let issuer = Arc::new(TokenIssuer::new(
            &Secret::new("session-test-secret-session-test".into()),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ));
        Fixture {
            service: SessionService::new(issuer, users.clone()),
            users,
            clock,
        }
    }

    async fn login(fx: &Fixture) -> crate::IssuedCredentials {
        let pair = fx.service.issuer().issue_pair("a@b.com", "Student").unwrap();
        fx.users
            .append_refresh_token("a@b.com", pair.refresh_token.expose().clone())
            .await
            .unwrap();
        pair
    }

    #[tokio::test]
    async fn authenticate_accepts_access_rejects_refresh() {
        let fx = fixture(10).await;
        let pair = login(&fx).await;

        let claims = fx.service.authenticate(pair.access_token.expose()).unwrap();
        assert_eq!(claims.sub, "a@b.com");
        assert!(matches!(
            fx.service.authenticate(pair.refresh_token.expose()),
            Err(Error::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_uses_current_role() {
        let fx = fixture(10).await;
        let pair = login(&fx).await;
        fx.users.set_role("a@b.com", "Administrator").await.unwrap();

        let access = fx.service.refresh(pair.refresh_token.expose()).await.unwrap();
        let claims = fx.service.authenticate(access.expose()).unwrap();
        assert_eq!(claims.permissions, resolve("Administrator"));

        // No rotation: the same refresh token keeps working
        assert!(fx.service.refresh(pair.refresh_token.expose()).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens_and_unrecorded_tokens() {
        let fx = fixture(10).await;
        let pair = login(&fx).await;
        assert!(matches!(
            fx.service.refresh(pair.access_token.expose()).await,
            Err(Error::InvalidToken(_))
        ));

        // Validly signed but never recorded on the identity
        let stray = fx.service.issuer().issue_refresh("a@b.com").unwrap();
        assert!(matches!(
            fx.service.resolve_refresh(stray.expose()).await,
            Err(Error::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_unknown_subject() {
        let fx = fixture(10).await;
        let stray = fx.service.issuer().issue_refresh("ghost@b.com").unwrap();
        assert!(matches!(
            fx.service.resolve_refresh(stray.expose()).await,
            Err(Error::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn evicted_refresh_token_stops_working() {
        let fx = fixture(1).await;
        let first = login(&fx).await;
        let second = login(&fx).await;

        assert!(fx.service.resolve_refresh(second.refresh_token.expose()).await.is_ok());
        assert!(matches!(
            fx.service.resolve_refresh(first.refresh_token.expose()).await,
            Err(Error::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let fx = fixture(10).await;
        let pair = login(&fx).await;
        fx.clock.advance(Duration::from_secs(3600));
        assert!(matches!(
            fx.service.refresh(pair.refresh_token.expose()).await,
            Err(Error::TokenExpired)
        ));
    }
}
