//! Shared OAuth 2.0 authorization-code client
//!
//! Builds authorization URLs and performs the code exchange for every
//! adapter. Adapters differ only in their identity endpoints, so they wrap
//! one `OAuthClient` each and add their own `fetch_identity`.

use std::time::Duration;

use common::Secret;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::{ProviderError, ProviderToken, Result};

const USER_AGENT: &str = concat!("auth-gateway/", env!("CARGO_PKG_VERSION"));

/// Static OAuth client registration for one provider.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
    /// Upper bound on every provider HTTP call
    pub timeout: Duration,
}

/// Raw token endpoint body. Some providers (GitHub) answer failures with a
/// 200 and an `error` field, so every field is optional.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Authorization-code client for a single provider registration.
#[derive(Debug)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
    authorize_url: Url,
    token_url: Url,
    scopes: Vec<String>,
    use_pkce: bool,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings) -> Result<Self> {
        let authorize_url = Url::parse(&settings.authorize_url).map_err(|e| {
            ProviderError::Config(format!(
                "invalid authorize_url {}: {e}",
                settings.authorize_url
            ))
        })?;
        let token_url = Url::parse(&settings.token_url).map_err(|e| {
            ProviderError::Config(format!("invalid token_url {}: {e}", settings.token_url))
        })?;
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            redirect_uri: settings.redirect_uri,
            authorize_url,
            token_url,
            scopes: settings.scopes,
            use_pkce: settings.use_pkce,
        })
    }

    pub fn uses_pkce(&self) -> bool {
        self.use_pkce
    }

    /// Build the provider authorization URL with all required parameters.
    pub fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String {
        let mut url = self.authorize_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            if !self.scopes.is_empty() {
                params.append_pair("scope", &self.scopes.join(" "));
            }
            params.append_pair("state", state);
            if let Some(challenge) = code_challenge {
                params.append_pair("code_challenge", challenge);
                params.append_pair("code_challenge_method", "S256");
            }
        }
        url.into()
    }

    /// Exchange an authorization code for a provider token.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ProviderToken> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose().as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(ProviderError::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let body = response
            .json::<TokenEndpointResponse>()
            .await
            .map_err(|e| ProviderError::TokenExchange(format!("invalid token response: {e}")))?;

        if let Some(error) = body.error {
            let description = body
                .error_description
                .unwrap_or_else(|| String::from("no description"));
            return Err(ProviderError::TokenExchange(format!(
                "{error}: {description}"
            )));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ProviderError::TokenExchange("token response missing access_token".into())
            })?;

        debug!(token_url = %self.token_url, "authorization code exchanged");

        Ok(ProviderToken {
            access_token: Secret::new(access_token),
            token_type: body.token_type,
            refresh_token: body.refresh_token.map(Secret::new),
            expires_in: body.expires_in,
        })
    }

    /// GET a JSON resource with the provider token as bearer credential.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &ProviderToken,
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token.access_token.expose())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Identity(format!("{url} returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Identity(format!("invalid response from {url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base: &str, use_pkce: bool) -> OAuthSettings {
        OAuthSettings {
            client_id: "client-123".into(),
            client_secret: Secret::new("shh".into()),
            redirect_uri: "http://localhost:8080/auth/mock/callback".into(),
            authorize_url: format!("{base}/authorize"),
            token_url: format!("{base}/token"),
            scopes: vec!["user:email".into()],
            use_pkce,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let client = OAuthClient::new(settings("https://provider.test", false)).unwrap();
        let url = Url::parse(&client.authorization_url("state-abc", None)).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(
            pairs["redirect_uri"],
            "http://localhost:8080/auth/mock/callback"
        );
        assert_eq!(pairs["scope"], "user:email");
        assert_eq!(pairs["state"], "state-abc");
        assert!(!pairs.contains_key("code_challenge"));
    }

    #[test]
    fn authorization_url_carries_pkce_challenge() {
        let client = OAuthClient::new(settings("https://provider.test", true)).unwrap();
        let url = Url::parse(&client.authorization_url("s", Some("challenge-xyz"))).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["code_challenge"], "challenge-xyz");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[test]
    fn invalid_authorize_url_is_config_error() {
        let mut s = settings("https://provider.test", false);
        s.authorize_url = "not a url".into();
        assert!(matches!(
            OAuthClient::new(s),
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn exchange_code_posts_form_and_parses_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=code-1"))
            .and(body_string_contains("client_secret=shh"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_abc",
                "token_type": "bearer",
                "scope": "user:email"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(settings(&server.uri(), true)).unwrap();
        let token = client
            .exchange_code("code-1", Some("verifier-1"))
            .await
            .unwrap();
        assert_eq!(token.access_token.expose(), "gho_abc");
        assert_eq!(token.token_type.as_deref(), Some("bearer"));
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn exchange_code_rejects_error_body_with_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::new(settings(&server.uri(), false)).unwrap();
        let err = client.exchange_code("stale", None).await.unwrap_err();
        match err {
            ProviderError::TokenExchange(msg) => assert!(msg.contains("bad_verification_code")),
            other => panic!("expected TokenExchange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_code_rejects_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let client = OAuthClient::new(settings(&server.uri(), false)).unwrap();
        let err = client.exchange_code("bad", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn exchange_code_unreachable_endpoint_is_http_error() {
        // Nothing listens on port 9 (discard) in the test environment
        let client = OAuthClient::new(settings("http://127.0.0.1:9", false)).unwrap();
        let err = client.exchange_code("code", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
    }
}
