//! Cross-device login by short polling code
//!
//! A device that cannot finish a browser login asks for a 6-digit code bound
//! to a token only it knows, shows the code to the user, and polls. The user
//! enters the code on a second, already signed-in device together with a
//! second factor (normally that device's refresh token). Redemption mints
//! credentials for the second factor's identity and parks them in the
//! rendezvous store, where the first device's next poll collects them.
//!
//! Lifecycle:
//! 1. `CodeExchange::request_code(token)` → code (1 min) + waiting exchange (5 min)
//! 2. `CodeExchange::redeem_code(code, factor)` → credentials, exchange `Granted`
//! 3. `CodeExchange::poll(token)` → `Waiting` or `Granted` (delivered once)

pub mod code;
pub mod error;
pub mod exchange;
pub mod factor;

pub use code::generate_code;
pub use error::{Error, Result};
pub use exchange::{CodeExchange, ExchangeStatus, PendingCode, PendingExchange, PollStatus, Redemption};
pub use factor::{RefreshTokenFactor, SecondFactor, StaticFactor};
