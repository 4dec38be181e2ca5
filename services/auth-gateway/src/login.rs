//! Provider login routes
//!
//! `GET /auth/{provider}/login` redirects to the provider; the provider sends
//! the browser back to `GET /auth/{provider}/callback`, which answers with an
//! HTML page carrying the issued tokens.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use session_auth::{LoginFlow, LoginOutcome};
use tracing::{info, warn};

use crate::AppState;
use crate::error::{ApiError, with_timeout};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    /// Set by the provider when the user refused consent
    #[serde(default)]
    error: Option<String>,
}

fn flow_for(state: &AppState, provider: &str) -> Result<Arc<LoginFlow>, ApiError> {
    state
        .logins
        .get(provider)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("unknown provider: {provider}")))
}

/// `GET /auth/{provider}/login`
pub async fn login_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let flow = flow_for(&state, &provider)?;
    let start = flow.begin().await;
    metrics::record_login(&provider, "started");

    Ok((
        StatusCode::FOUND,
        [
            (LOCATION, start.authorization_url),
            (CACHE_CONTROL, "no-store".to_owned()),
        ],
    )
        .into_response())
}

/// `GET /auth/{provider}/callback?code=&state=[&error=]`
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let flow = flow_for(&state, &provider)?;
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

    if let Some(reason) = non_empty(params.error) {
        info!(provider = %provider, reason = %reason, "provider reported login refusal");
        metrics::record_login(&provider, "denied");
        let handle = non_empty(params.state)
            .ok_or_else(|| ApiError::BadRequest("missing state".into()))?;
        flow.deny(&handle).await?;
        return Err(session_auth::Error::AccessDenied.into());
    }

    let (Some(code), Some(handle)) = (non_empty(params.code), non_empty(params.state)) else {
        return Err(ApiError::BadRequest("missing code or state".into()));
    };

    let outcome = with_timeout(state.request_timeout, flow.complete(&code, &handle))
        .await
        .inspect_err(|e| {
            warn!(provider = %provider, status = e.status().as_u16(), "login callback failed");
            metrics::record_login(&provider, "failed");
        })?;
    metrics::record_login(&provider, "success");

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, "no-store"),
        ],
        render_success(&outcome, &state.public_url),
    )
        .into_response())
}

fn render_success(outcome: &LoginOutcome, return_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization Successful</title></head>
<body>
<h1>Authorization Successful</h1>
<p>Signed in as {email}.</p>
<dl>
<dt>Access token</dt><dd><code id="access-token">{access}</code></dd>
<dt>Refresh token</dt><dd><code id="refresh-token">{refresh}</code></dd>
</dl>
<p><a href="{back}">Return to the application</a></p>
</body>
</html>
"#,
        email = escape_html(&outcome.email),
        access = escape_html(outcome.credentials.access_token.expose()),
        refresh = escape_html(outcome.credentials.refresh_token.expose()),
        back = escape_html(return_url),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use session_auth::IssuedCredentials;

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("eyJh.eyJz.sig-_"), "eyJh.eyJz.sig-_");
    }

    #[test]
    fn success_page_embeds_both_tokens() {
        let outcome = LoginOutcome {
            email: "<b>@example.com".into(),
            created: true,
            credentials: IssuedCredentials {
                access_token: Secret::new("access.jwt.value".into()),
                refresh_token: Secret::new("refresh.jwt.value".into()),
            },
        };
        let page = render_success(&outcome, "https://app.example.com");
        assert!(page.contains(r#"<code id="access-token">access.jwt.value</code>"#));
        assert!(page.contains(r#"<code id="refresh-token">refresh.jwt.value</code>"#));
        assert!(page.contains("&lt;b&gt;@example.com"));
        assert!(page.contains(r#"href="https://app.example.com""#));
    }
}
