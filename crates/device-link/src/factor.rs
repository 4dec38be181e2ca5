//! Second factor presented with a polling code
//!
//! The factor proves the redeeming device is already signed in and names the
//! identity the new credentials are minted for.

use std::sync::Arc;

use common::{BoxFuture, Secret};
use session_auth::SessionService;
use tracing::debug;

use crate::error::{Error, Result};

/// Check a presented factor and return the email it vouches for.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn SecondFactor>`).
pub trait SecondFactor: Send + Sync {
    fn verify<'a>(&'a self, factor: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Accepts a refresh token still on record for its identity.
pub struct RefreshTokenFactor {
    sessions: Arc<SessionService>,
}

impl RefreshTokenFactor {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }

    async fn check(&self, factor: &str) -> Result<String> {
        match self.sessions.resolve_refresh(factor).await {
            Ok(user) => Ok(user.email),
            Err(session_auth::Error::InvalidToken(reason)) => {
                debug!(reason = %reason, "refresh token factor rejected");
                Err(Error::InvalidFactor)
            }
            Err(session_auth::Error::TokenExpired) => Err(Error::InvalidFactor),
            Err(e) => Err(e.into()),
        }
    }
}

impl SecondFactor for RefreshTokenFactor {
    fn verify<'a>(&'a self, factor: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.check(factor))
    }
}

/// Fixed sentinel mapped to one fixed identity. Development only.
pub struct StaticFactor {
    sentinel: Secret<String>,
    email: String,
}

impl StaticFactor {
    pub fn new(sentinel: Secret<String>, email: impl Into<String>) -> Self {
        Self {
            sentinel,
            email: email.into(),
        }
    }
}

impl SecondFactor for StaticFactor {
    fn verify<'a>(&'a self, factor: &'a str) -> BoxFuture<'a, Result<String>> {
        let result = if factor == self.sentinel.expose().as_str() {
            Ok(self.email.clone())
        } else {
            Err(Error::InvalidFactor)
        };
        Box::pin(std::future::ready(result))
    }
}
