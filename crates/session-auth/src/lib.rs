//! Session credentials for provider-authenticated users
//!
//! Everything between "user clicked login" and "client holds a signed
//! session token" that is not provider specific lives here.
//!
//! Login flow:
//! 1. `LoginFlow::begin()` records a pending attempt in the
//!    `AuthStateTracker` and returns the provider authorization URL
//! 2. Provider redirects back; `LoginFlow::complete()` consumes the attempt,
//!    exchanges the code and fetches the remote identity via the adapter
//! 3. The identity is found or created in the `UserStore`
//! 4. `TokenIssuer::issue_pair()` mints access + refresh tokens with
//!    permissions resolved from the user's role
//! 5. The refresh token is appended to the user record
//!
//! `SessionService` verifies access tokens and trades refresh tokens for new
//! access tokens afterwards.

pub mod constants;
pub mod error;
pub mod flow;
pub mod permissions;
pub mod session;
pub mod state;
pub mod token;
pub mod users;

pub use error::{Error, Result};
pub use flow::{LoginFlow, LoginOutcome, LoginStart};
pub use permissions::{Permissions, resolve};
pub use session::SessionService;
pub use state::{AttemptStatus, AuthAttempt, AuthStateTracker};
pub use token::{Claims, IssuedCredentials, TokenIssuer};
pub use users::{LocalUserStore, UserRecord, UserStore, find_or_create};
