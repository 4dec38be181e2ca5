//! Yandex ID adapter
//!
//! A single `GET /info?format=json` returns the whole profile. The account's
//! `default_email` is the identity; an account without one cannot log in.

use serde::Deserialize;

use crate::oauth::OAuthClient;
use crate::{
    BoxFuture, IdentityProvider, ProviderError, ProviderToken, RemoteIdentity, Result, split_name,
};

pub const AUTHORIZE_URL: &str = "https://oauth.yandex.ru/authorize";
pub const TOKEN_URL: &str = "https://oauth.yandex.ru/token";
pub const INFO_URL: &str = "https://login.yandex.ru/info?format=json";
pub const DEFAULT_SCOPES: &[&str] = &["login:info", "login:email"];

#[derive(Debug, Default, Deserialize)]
struct YandexInfo {
    #[serde(default)]
    default_email: Option<String>,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl YandexInfo {
    fn into_identity(self) -> Result<RemoteIdentity> {
        let email = non_empty(self.default_email).ok_or(ProviderError::NoVerifiedEmail)?;

        let (mut first_name, mut last_name) = (non_empty(self.first_name), non_empty(self.last_name));
        if first_name.is_none() && last_name.is_none() {
            if let Some(real_name) = self.real_name.as_deref() {
                (first_name, last_name) = split_name(real_name);
            }
        }

        Ok(RemoteIdentity {
            email,
            login: non_empty(self.login),
            display_name: non_empty(self.display_name).or_else(|| non_empty(self.real_name)),
            first_name,
            last_name,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct YandexProvider {
    id: String,
    oauth: OAuthClient,
    info_url: String,
}

impl YandexProvider {
    pub fn new(id: impl Into<String>, oauth: OAuthClient, info_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            oauth,
            info_url: info_url.into(),
        }
    }

    async fn identity(&self, token: &ProviderToken) -> Result<RemoteIdentity> {
        let info: YandexInfo = self.oauth.get_json(&self.info_url, token).await?;
        info.into_identity()
    }
}

impl IdentityProvider for YandexProvider {
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
