//! Error types for the polling code exchange

/// Errors from code issuance, redemption and polling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid or expired code")]
    InvalidCode,

    #[error("second factor rejected")]
    InvalidFactor,

    #[error("unknown or expired session")]
    UnknownSession,

    #[error("no free code after retries")]
    CodeSpaceExhausted,

    #[error(transparent)]
    Session(#[from] session_auth::Error),
}

/// Result alias for device-link operations.
pub type Result<T> = std::result::Result<T, Error>;
