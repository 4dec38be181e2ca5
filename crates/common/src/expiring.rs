//! Keyed store with per-entry expiry
//!
//! Every short-lived table in the gateway (login attempts, polling codes,
//! pending exchanges) is an `ExpiringMap`. One tokio Mutex serializes all
//! mutation of a map, so check-then-transition sequences run atomically
//! inside a single critical section. Expired entries are never returned by
//! reads; they are evicted lazily on access and in bulk by `sweep`.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Entries that carry an absolute expiry (unix milliseconds).
pub trait Expiring {
    fn expires_at(&self) -> u64;

    /// An entry is dead from its expiry instant onwards.
    fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at()
    }
}

/// Named keyed store owning its lock and eviction policy.
pub struct ExpiringMap<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, V>>,
}

impl<V: Expiring> ExpiringMap<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert or overwrite unconditionally. Returns the previous entry.
    pub async fn insert(&self, key: String, value: V) -> Option<V> {
        let mut entries = self.entries.lock().await;
        entries.insert(key, value)
    }

    /// Insert only if no live entry holds `key`.
    ///
    /// Returns `false` (and drops `value`) when the key is taken.
    pub async fn insert_vacant(&self, key: String, value: V, now_millis: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(existing) if !existing.is_expired(now_millis) => false,
            _ => {
                entries.insert(key, value);
                true
            }
        }
    }

    /// Clone of the live entry for `key`. An expired entry is evicted.
    pub async fn get(&self, key: &str, now_millis: u64) -> Option<V>
    where
        V: Clone,
    {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now_millis) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Run `f` on the entry (live or not) while holding the lock.
    pub async fn update<R>(&self, key: &str, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let mut entries = self.entries.lock().await;
        f(entries.get_mut(key))
    }

    /// Remove and return the entry for `key` if it is still live.
    pub async fn take(&self, key: &str, now_millis: u64) -> Option<V> {
        let mut entries = self.entries.lock().await;
        entries
            .remove(key)
            .filter(|entry| !entry.is_expired(now_millis))
    }

    /// Run a compound operation over the whole table under the lock.
    pub async fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, V>) -> R) -> R {
        let mut entries = self.entries.lock().await;
        f(&mut entries)
    }

    /// Evict every expired entry. Returns how many were removed.
    pub async fn sweep(&self, now_millis: u64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_millis));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
