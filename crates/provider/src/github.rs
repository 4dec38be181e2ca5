//! GitHub identity adapter
//!
//! `GET /user` gives the profile. Its `email` is only the public email and is
//! often null, in which case `GET /user/emails` is consulted and the first
//! address flagged both primary and verified wins.

use serde::Deserialize;
use tracing::debug;

use crate::oauth::OAuthClient;
use crate::{
    BoxFuture, IdentityProvider, ProviderError, ProviderToken, RemoteIdentity, Result, split_name,
};

pub const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
pub const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const API_BASE: &str = "https://api.github.com";
pub const DEFAULT_SCOPES: &[&str] = &["user:email"];

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// One entry of `GET /user/emails`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

/// First address that is both primary and verified.
pub fn select_primary_verified(emails: &[GitHubEmail]) -> Option<&GitHubEmail> {
    emails.iter().find(|e| e.primary && e.verified)
}

pub struct GitHubProvider {
    id: String,
    oauth: OAuthClient,
    api_base: String,
}

impl GitHubProvider {
    pub fn new(id: impl Into<String>, oauth: OAuthClient, api_base: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            oauth,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn identity(&self, token: &ProviderToken) -> Result<RemoteIdentity> {
        let user: GitHubUser = self
            .oauth
            .get_json(&format!("{}/user", self.api_base), token)
            .await?;

        let email = match user.email.filter(|e| !e.trim().is_empty()) {
            Some(email) => email,
            None => {
                debug!(provider = %self.id, login = %user.login, "profile has no email, querying email list");
                let emails: Vec<GitHubEmail> = self
                    .oauth
                    .get_json(&format!("{}/user/emails", self.api_base), token)
                    .await?;
                select_primary_verified(&emails)
                    .map(|e| e.email.clone())
                    .ok_or(ProviderError::NoVerifiedEmail)?
            }
        };

        let (first_name, last_name) = user
            .name
            .as_deref()
            .map(split_name)
            .unwrap_or((None, None));

        Ok(RemoteIdentity {
            email,
            login: Some(user.login),
            display_name: user.name.filter(|n| !n.trim().is_empty()),
            first_name,
            last_name,
        })
    }
}

impl IdentityProvider for GitHubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn uses_pkce(&self) -> bool {
        self.oauth.uses_pkce()
    }

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String {
        self.oauth.authorization_url(state, code_challenge)
    }

    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ProviderToken>> {
        Box::pin(self.oauth.exchange_code(code, code_verifier))
    }

    fn fetch_identity<'a>(
        &'a self,
        token: &'a ProviderToken,
    ) -> BoxFuture<'a, Result<RemoteIdentity>> {
        Box::pin(self.identity(token))
    }
}
