//! Authorization state tracking between login redirect and callback
//!
//! Each login attempt gets an unguessable handle that travels through the
//! provider as the OAuth `state` parameter. An attempt moves
//! `Pending -> Approved` exactly once (callback) or `Pending -> Denied`
//! (provider reported a refusal). Completing an attempt pulls its expiry to
//! "now", so a replayed callback finds it expired.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{Expiring, ExpiringMap, Secret, SharedClock, deadline};
use rand::RngExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Bytes of CSPRNG output per handle (43 chars base64url).
const HANDLE_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    Approved,
    Denied,
}

/// One login attempt.
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub handle: String,
    pub provider: String,
    /// PKCE verifier for the code exchange, when the provider uses PKCE
    pub code_verifier: Option<Secret<String>>,
    /// Unix milliseconds
    pub expires_at: u64,
    pub status: AttemptStatus,
}

impl Expiring for AuthAttempt {
    fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

/// Per-provider table of login attempts.
pub struct AuthStateTracker {
    provider: String,
    ttl: Duration,
    clock: SharedClock,
    attempts: ExpiringMap<AuthAttempt>,
}

impl AuthStateTracker {
    pub fn new(provider: impl Into<String>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            provider: provider.into(),
            ttl,
            clock,
            attempts: ExpiringMap::new("auth_state"),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Record a new pending attempt and return its handle.
    pub async fn begin(&self, code_verifier: Option<String>) -> String {
        let now = self.clock.now_millis();
        let handle = generate_handle();
        let attempt = AuthAttempt {
            handle: handle.clone(),
            provider: self.provider.clone(),
            code_verifier: code_verifier.map(Secret::new),
            expires_at: deadline(now, self.ttl),
            status: AttemptStatus::Pending,
        };
        self.attempts.insert(handle.clone(), attempt).await;
        debug!(provider = %self.provider, "login attempt started");
        handle
    }

    /// Transition a live pending attempt to `Approved` and return it.
    ///
    /// Single use: the attempt's expiry is set to now, so any later call
    /// fails with `StateExpired` (or `StateNotFound` once swept).
    pub async fn complete(&self, handle: &str) -> Result<AuthAttempt> {
        let now = self.clock.now_millis();
        self.attempts
            .update(handle, |entry| -> Result<AuthAttempt> {
                let attempt = entry.ok_or(Error::StateNotFound)?;
                if attempt.is_expired(now) || attempt.status != AttemptStatus::Pending {
                    return Err(Error::StateExpired);
                }
                attempt.status = AttemptStatus::Approved;
                attempt.expires_at = now;
                Ok(attempt.clone())
            })
            .await
    }

    /// Transition a live pending attempt to `Denied`.
    pub async fn deny(&self, handle: &str) -> Result<()> {
        let now = self.clock.now_millis();
        self.attempts
            .update(handle, |entry| -> Result<()> {
                let attempt = entry.ok_or(Error::StateNotFound)?;
                if attempt.is_expired(now) || attempt.status != AttemptStatus::Pending {
                    return Err(Error::StateExpired);
                }
                attempt.status = AttemptStatus::Denied;
                Ok(())
            })
            .await
    }

    /// Evict expired attempts (including completed ones).
    pub async fn sweep_expired(&self) -> usize {
        self.attempts.sweep(self.clock.now_millis()).await
    }

    pub async fn len(&self) -> usize {
        self.attempts.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.is_empty().await
    }
}

fn generate_handle() -> String {
    let mut bytes = [0u8; HANDLE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
