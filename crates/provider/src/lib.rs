//! Identity provider abstraction
//!
//! Defines the `IdentityProvider` trait that decouples the login flow from a
//! specific OAuth provider. Every adapter exposes the same pair of calls:
//! exchange an authorization code for a provider token, then fetch the
//! remote identity (email, names) with that token. The login flow, state
//! tracking and token issuance live elsewhere and never see provider
//! specifics.

pub mod github;
pub mod oauth;
pub mod pkce;
pub mod yandex;

pub use github::GitHubProvider;
pub use oauth::{OAuthClient, OAuthSettings};
pub use yandex::YandexProvider;

use common::{BoxFuture, Secret};

/// Token issued by the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: Secret<String>,
    pub token_type: Option<String>,
    pub refresh_token: Option<Secret<String>>,
    /// Seconds until the provider token expires, when reported
    pub expires_in: Option<u64>,
}

/// Identity as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub email: String,
    pub login: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl RemoteIdentity {
    /// Identity known only by its email address.
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }
}

/// Errors from provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("identity fetch failed: {0}")]
    Identity(String),

    #[error("no primary verified email on the provider account")]
    NoVerifiedEmail,
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Adapter over one OAuth identity provider.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn IdentityProvider>`).
pub trait IdentityProvider: Send + Sync {
    /// Route and log identifier (e.g. "github", "yandex")
    fn id(&self) -> &str;

    /// Whether logins carry a PKCE verifier/challenge pair.
    fn uses_pkce(&self) -> bool;

    /// Provider authorization URL carrying `state` (and the PKCE challenge).
    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String;

    /// Exchange the callback's authorization code for a provider token.
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ProviderToken>>;

    /// Fetch the remote identity the token belongs to.
    fn fetch_identity<'a>(&'a self, token: &'a ProviderToken)
    -> BoxFuture<'a, Result<RemoteIdentity>>;
}

/// Split a free-form display name into first and last name.
pub(crate) fn split_name(name: &str) -> (Option<String>, Option<String>) {
    let name = name.trim();
    if name.is_empty() {
        return (None, None);
    }
    match name.split_once(' ') {
        Some((first, last)) => (Some(first.to_owned()), Some(last.trim().to_owned())),
        None => (Some(name.to_owned()), None),
    }
}
