//! Error types for login and session operations

/// Errors from login and session operations.
///
/// `StateNotFound`/`StateExpired` never carry detail: callers only learn
/// that a handle is invalid or expired.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authorization state not found")]
    StateNotFound,

    #[error("authorization state expired or already used")]
    StateExpired,

    #[error("authorization denied by provider")]
    AccessDenied,

    #[error("identity provider error: {0}")]
    Upstream(String),

    #[error("user store error: {0}")]
    Storage(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,
}

/// Result alias for session-auth operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<provider::ProviderError> for Error {
    fn from(err: provider::ProviderError) -> Self {
        Self::Upstream(err.to_string())
    }
}
