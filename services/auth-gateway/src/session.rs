//! Session routes: `GET /me` and `POST /auth/refresh`

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::{ApiError, with_timeout};

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `GET /me`: claims of the bearer access token.
pub async fn me_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer(&headers).ok_or(ApiError::Unauthorized("missing bearer token"))?;
    let claims = state.sessions.authenticate(token)?;
    Ok(Json(json!({
        "email": claims.sub,
        "permissions": claims.permissions,
        "expires_at": claims.exp,
    }))
    .into_response())
}

/// `POST /auth/refresh`: trade a refresh token for a new access token.
///
/// The refresh token comes from a JSON body `{"refresh_token": ..}` or, with
/// an empty body, from the `Authorization: Bearer` header.
pub async fn refresh_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let refresh_token = if body.is_empty() {
        bearer(&headers)
            .map(str::to_owned)
            .ok_or(ApiError::Unauthorized("missing refresh token"))?
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("malformed refresh request: {e}")))?
            .refresh_token
    };

    let access = with_timeout(state.request_timeout, state.sessions.refresh(&refresh_token)).await?;
    Ok((
        [(CACHE_CONTROL, "no-store")],
        Json(json!({
            "access_token": access.expose(),
            "token_type": "Bearer",
            "expires_in": state.sessions.issuer().access_ttl().as_secs(),
        })),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer eyJ.x.y"));
        assert_eq!(bearer(&headers), Some("eyJ.x.y"));
    }
}
