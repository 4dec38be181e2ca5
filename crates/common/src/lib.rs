//! Shared building blocks for the auth gateway crates
//!
//! Secret handling, the injectable clock, and the expiring keyed store that
//! backs every short-lived table (login attempts, polling codes, pending
//! exchanges).

mod clock;
mod error;
mod expiring;
mod secret;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, deadline};
pub use error::{Error, Result};
pub use expiring::{Expiring, ExpiringMap};
pub use secret::Secret;

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future used by the dyn-compatible adapter traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
