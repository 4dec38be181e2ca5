//! Injectable wall clock
//!
//! All expiry decisions read time through `Clock` so tests can move time
//! forward without sleeping. Timestamps are unix milliseconds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time as unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    /// Current time as unix seconds.
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// Shared clock handle injected into every component.
pub type SharedClock = Arc<dyn Clock>;

/// Expiry instant `ttl` after `now_millis`, clamped at `u64::MAX`.
pub fn deadline(now_millis: u64, ttl: Duration) -> u64 {
    let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_millis.saturating_add(ttl_millis)
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually driven clock for deterministic expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
