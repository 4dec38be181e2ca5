//! Signed session tokens
//!
//! Tokens are HS256 JWTs signed with one process-wide secret. Expiry is
//! checked against the injected `Clock` rather than jsonwebtoken's own wall
//! clock, with zero leeway and millisecond precision via `exp_ms`. The
//! standard `exp` is `exp_ms` rounded up to the next second.

use std::time::Duration;

use common::{Secret, SharedClock, deadline};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::REFRESH_PERMISSION;
use crate::error::{Error, Result};
use crate::permissions::{Permissions, resolve};

/// Signed claim set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity email
    pub sub: String,
    pub permissions: Permissions,
    /// Issued at, unix seconds
    pub iat: u64,
    /// Expires at, unix seconds (rounded up)
    pub exp: u64,
    /// Expires at, unix milliseconds; authoritative for `verify`
    pub exp_ms: u64,
    /// Unique token id; tokens minted in the same second still differ
    pub jti: String,
}

impl Claims {
    pub fn is_refresh(&self) -> bool {
        self.permissions.contains(REFRESH_PERMISSION)
    }
}

/// Access + refresh token pair handed to a client.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: SharedClock,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        secret: &Secret<String>,
        clock: SharedClock,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced in `verify` against the injected clock
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.expose().as_bytes()),
            decoding: DecodingKey::from_secret(secret.expose().as_bytes()),
            validation,
            clock,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a claim set for `subject` expiring `ttl` from now.
    pub fn issue(&self, subject: &str, permissions: &Permissions, ttl: Duration) -> Result<String> {
        let now = self.clock.now_millis();
        let exp_ms = deadline(now, ttl);
        let claims = Claims {
            sub: subject.to_owned(),
            permissions: permissions.clone(),
            iat: now / 1000,
            exp: exp_ms.div_ceil(1000),
            exp_ms,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    /// Access token carrying the permissions of `role` as of now.
    pub fn issue_access(&self, email: &str, role: &str) -> Result<Secret<String>> {
        self.issue(email, &resolve(role), self.access_ttl)
            .map(Secret::new)
    }

    /// Refresh token; its only permission is `refresh`.
    pub fn issue_refresh(&self, email: &str) -> Result<Secret<String>> {
        let permissions = Permissions::from([REFRESH_PERMISSION.to_owned()]);
        self.issue(email, &permissions, self.refresh_ttl)
            .map(Secret::new)
    }

    pub fn issue_pair(&self, email: &str, role: &str) -> Result<IssuedCredentials> {
        let credentials = IssuedCredentials {
            access_token: self.issue_access(email, role)?,
            refresh_token: self.issue_refresh(email)?,
        };
        debug!(email, role, "issued credential pair");
        Ok(credentials)
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        if self.clock.now_millis() >= data.claims.exp_ms {
            return Err(Error::TokenExpired);
        }
        Ok(data.claims)
    }
}
