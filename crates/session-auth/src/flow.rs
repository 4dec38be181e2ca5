//! Provider login orchestration
//!
//! One `LoginFlow` per configured provider. The flow is identical for every
//! provider; only the `IdentityProvider` adapter differs.
//!
//! The attempt is consumed first, before any external call. A callback that
//! fails later (upstream, storage, signing) has still used up its handle; the
//! client restarts from `begin()`.

use std::sync::Arc;

use common::SharedClock;
use provider::{IdentityProvider, pkce};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::state::AuthStateTracker;
use crate::token::{IssuedCredentials, TokenIssuer};
use crate::users::{UserStore, find_or_create};

/// Redirect target and state handle for a new login.
#[derive(Debug, Clone)]
pub struct LoginStart {
    pub authorization_url: String,
    pub state: String,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub email: String,
    /// Whether this login created the user record
    pub created: bool,
    pub credentials: IssuedCredentials,
}

pub struct LoginFlow {
    provider: Arc<dyn IdentityProvider>,
    tracker: AuthStateTracker,
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
    clock: SharedClock,
}

impl LoginFlow {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        tracker: AuthStateTracker,
        issuer: Arc<TokenIssuer>,
        users: Arc<dyn UserStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider,
            tracker,
            issuer,
            users,
            clock,
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn tracker(&self) -> &AuthStateTracker {
        &self.tracker
    }

    /// Start a login: record the attempt, build the provider redirect.
    pub async fn begin(&self) -> LoginStart {
        let verifier = self.provider.uses_pkce().then(pkce::generate_verifier);
        let challenge = verifier.as_deref().map(pkce::compute_challenge);
        let state = self.tracker.begin(verifier).await;
        LoginStart {
            authorization_url: self
                .provider
                .authorization_url(&state, challenge.as_deref()),
            state,
        }
    }

    /// Record a provider-side refusal for `state`.
    pub async fn deny(&self, state: &str) -> Result<()> {
        self.tracker.deny(state).await?;
        info!(provider = %self.provider.id(), "login denied at provider");
        Ok(())
    }

    /// Finish a login from the provider callback.
    pub async fn complete(&self, code: &str, state: &str) -> Result<LoginOutcome> {
        if code.is_empty() || state.is_empty() {
            return Err(Error::InvalidInput("missing code or state".into()));
        }

        let attempt = self.tracker.complete(state).await?;
        let provider_id = self.provider.id();

        let token = self
            .provider
            .exchange_code(code, attempt.code_verifier.as_ref().map(|v| v.expose().as_str()))
            .await
            .inspect_err(|e| warn!(provider = %provider_id, error = %e, "code exchange failed"))?;

        let identity = self
            .provider
            .fetch_identity(&token)
            .await
            .inspect_err(|e| warn!(provider = %provider_id, error = %e, "identity fetch failed"))?;

        let (user, created) =
            find_or_create(self.users.as_ref(), &identity, self.clock.now_millis()).await?;

        let credentials = self.issuer.issue_pair(&user.email, &user.role)?;
        self.users
            .append_refresh_token(&user.email, credentials.refresh_token.expose().clone())
            .await?;

        info!(provider = %provider_id, email = %user.email, created, "login completed");
        Ok(LoginOutcome {
            email: user.email,
            created,
            credentials,
        })
    }
}
