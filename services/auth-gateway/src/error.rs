//! HTTP error mapping
//!
//! Domain errors from the library crates become an `ApiError`, which renders
//! as a plain-text response. 5xx bodies are fixed strings; the underlying
//! detail goes to the log only.

use std::future::Future;
use std::time::Duration;

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden(&'static str),
    NotFound(String),
    Unavailable(&'static str),
    /// `public` is sent to the client, `detail` is only logged
    Internal {
        public: &'static str,
        detail: String,
    },
    Timeout,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } | ApiError::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
            ApiError::Unauthorized(msg) | ApiError::Forbidden(msg) | ApiError::Unavailable(msg) => {
                (*msg).to_owned()
            }
            ApiError::Internal { public, .. } => (*public).to_owned(),
            ApiError::Timeout => "request timed out".to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal { public, detail } => error!(error = %detail, "{public}"),
            ApiError::Timeout => error!("request exceeded its deadline"),
            _ => {}
        }
        (
            self.status(),
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body(),
        )
            .into_response()
    }
}

impl From<session_auth::Error> for ApiError {
    fn from(err: session_auth::Error) -> Self {
        use session_auth::Error;
        match err {
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::StateNotFound | Error::StateExpired => {
                ApiError::Forbidden("authorization state is invalid or expired")
            }
            Error::AccessDenied => ApiError::Unauthorized("authorization was denied"),
            Error::InvalidToken(_) | Error::TokenExpired => {
                ApiError::Unauthorized("invalid or expired token")
            }
            Error::Upstream(detail) => ApiError::Internal {
                public: "identity provider request failed",
                detail,
            },
            Error::Storage(detail) => ApiError::Internal {
                public: "user store failure",
                detail,
            },
            Error::Signing(detail) => ApiError::Internal {
                public: "failed to issue tokens",
                detail,
            },
        }
    }
}

impl From<device_link::Error> for ApiError {
    fn from(err: device_link::Error) -> Self {
        use device_link::Error;
        match err {
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::InvalidCode => ApiError::Unauthorized("invalid or expired code"),
            Error::InvalidFactor => ApiError::Unauthorized("invalid second factor"),
            Error::UnknownSession => ApiError::Unauthorized("unknown or expired session"),
            Error::CodeSpaceExhausted => ApiError::Unavailable("no free codes, retry shortly"),
            Error::Session(inner) => inner.into(),
        }
    }
}

/// Run `fut` under the request deadline.
pub async fn with_timeout<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, ApiError>
where
    E: Into<ApiError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ApiError::Timeout),
    }
}
