//! Rendezvous store for the polling code handshake
//!
//! Two tables, each an `ExpiringMap` with its own lock:
//! - codes: 6-digit code → bound token (short TTL, single use)
//! - exchanges: bound token → waiting/granted status (longer TTL)
//!
//! Redemption checks the factor before consuming the code, so a mistyped
//! factor can be retried while the code is live. The code is then taken
//! atomically; of two concurrent redemptions only one gets it.

use std::sync::Arc;
use std::time::Duration;

use common::{Expiring, ExpiringMap, SharedClock, deadline};
use provider::RemoteIdentity;
use session_auth::{IssuedCredentials, TokenIssuer, UserStore, find_or_create};
use tracing::{debug, info, warn};

use crate::code::generate_code;
use crate::error::{Error, Result};
use crate::factor::SecondFactor;

pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_EXCHANGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Draws before giving up on finding a code not held by a live entry.
pub const MAX_CODE_ATTEMPTS: usize = 16;

/// An issued code awaiting redemption.
#[derive(Debug, Clone)]
pub struct PendingCode {
    pub code: String,
    pub bound_token: String,
    pub expires_at: u64,
}

impl Expiring for PendingCode {
    fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

#[derive(Debug, Clone)]
pub enum ExchangeStatus {
    Waiting,
    Granted(IssuedCredentials),
}

/// Per-requesting-device rendezvous slot.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub expires_at: u64,
    pub status: ExchangeStatus,
}

impl Expiring for PendingExchange {
    fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

/// What the requesting device sees when it polls.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Waiting,
    Granted(IssuedCredentials),
}

/// Credentials handed to the redeeming device.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub email: String,
    pub credentials: IssuedCredentials,
}

pub struct CodeExchange {
    code_ttl: Duration,
    exchange_ttl: Duration,
    codes: ExpiringMap<PendingCode>,
    exchanges: ExpiringMap<PendingExchange>,
    factor: Arc<dyn SecondFactor>,
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
    clock: SharedClock,
}

impl CodeExchange {
    pub fn new(
        code_ttl: Duration,
        exchange_ttl: Duration,
        factor: Arc<dyn SecondFactor>,
        issuer: Arc<TokenIssuer>,
        users: Arc<dyn UserStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            code_ttl,
            exchange_ttl,
            codes: ExpiringMap::new("device_codes"),
            exchanges: ExpiringMap::new("device_exchanges"),
            factor,
            issuer,
            users,
            clock,
        }
    }

    /// Issue a code bound to `bound_token` and open (or reset) its exchange.
    pub async fn request_code(&self, bound_token: &str) -> Result<String> {
        if bound_token.is_empty() {
            return Err(Error::InvalidInput("token is required".into()));
        }

        let now = self.clock.now_millis();
        let code_expires_at = deadline(now, self.code_ttl);

        let mut issued = None;
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = generate_code();
            let entry = PendingCode {
                code: code.clone(),
                bound_token: bound_token.to_owned(),
                expires_at: code_expires_at,
            };
            if self.codes.insert_vacant(code.clone(), entry, now).await {
                issued = Some(code);
                break;
            }
            debug!(attempt, "polling code collided with a live code");
        }
        let code = issued.ok_or_else(|| {
            warn!(attempts = MAX_CODE_ATTEMPTS, "no free polling code");
            Error::CodeSpaceExhausted
        })?;

        self.exchanges
            .insert(
                bound_token.to_owned(),
                PendingExchange {
                    expires_at: deadline(now, self.exchange_ttl),
                    status: ExchangeStatus::Waiting,
                },
            )
            .await;

        debug!("polling code issued");
        Ok(code)
    }

    /// Redeem a live code with a second factor.
    ///
    /// Mints credentials for the factor's identity, records the refresh
    /// token, and grants the exchange of the device that requested the code.
    pub async fn redeem_code(&self, code: &str, factor: &str) -> Result<Redemption> {
        if code.is_empty() || factor.is_empty() {
            return Err(Error::InvalidInput("code and second factor are required".into()));
        }

        if self
            .codes
            .get(code, self.clock.now_millis())
            .await
            .is_none()
        {
            return Err(Error::InvalidCode);
        }

        let email = self.factor.verify(factor).await?;

        // Expiry is re-checked at take time: the factor check may have been slow
        let pending = self
            .codes
            .take(code, self.clock.now_millis())
            .await
            .ok_or(Error::InvalidCode)?;

        let (user, _) = find_or_create(
            self.users.as_ref(),
            &RemoteIdentity::from_email(email),
            self.clock.now_millis(),
        )
        .await?;
        let credentials = self.issuer.issue_pair(&user.email, &user.role)?;
        self.users
            .append_refresh_token(&user.email, credentials.refresh_token.expose().clone())
            .await?;

        let now = self.clock.now_millis();
        let granted = self
            .exchanges
            .update(&pending.bound_token, |entry| match entry {
                Some(exchange) if !exchange.is_expired(now) => {
                    exchange.status = ExchangeStatus::Granted(credentials.clone());
                    true
                }
                _ => false,
            })
            .await;
        if !granted {
            warn!(email = %user.email, "code redeemed but requesting session has expired");
        }

        info!(email = %user.email, granted, "polling code redeemed");
        Ok(Redemption {
            email: user.email,
            credentials,
        })
    }

    /// Check the exchange opened by `bound_token`.
    ///
    /// Granted credentials are handed out once; the exchange is removed.
    pub async fn poll(&self, bound_token: &str) -> Result<PollStatus> {
        if bound_token.is_empty() {
            return Err(Error::InvalidInput("token is required".into()));
        }
        let now = self.clock.now_millis();
        self.exchanges
            .with_entries(|entries| -> Result<PollStatus> {
                let exchange = entries
                    .remove(bound_token)
                    .filter(|e| !e.is_expired(now))
                    .ok_or(Error::UnknownSession)?;
                match exchange.status {
                    ExchangeStatus::Granted(credentials) => Ok(PollStatus::Granted(credentials)),
                    ExchangeStatus::Waiting => {
                        entries.insert(bound_token.to_owned(), exchange);
                        Ok(PollStatus::Waiting)
                    }
                }
            })
            .await
    }

    /// Evict expired codes and exchanges. Returns `(codes, exchanges)` removed.
    pub async fn sweep_expired(&self) -> (usize, usize) {
        let now = self.clock.now_millis();
        (self.codes.sweep(now).await, self.exchanges.sweep(now).await)
    }

    pub async fn live_codes(&self) -> usize {
        self.codes.len().await
    }

    pub async fn live_exchanges(&self) -> usize {
        self.exchanges.len().await
    }
}
