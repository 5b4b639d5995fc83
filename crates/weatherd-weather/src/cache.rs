//! In-memory TTL cache with a per-key history log.
//!
//! Expiry is lazy: an expired record is hidden from `get` and `list` but stays
//! in the map until it is overwritten or `purge_expired` runs. History is
//! append-only and survives purges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};

/// A cached value and the instant after which it is no longer served.
#[derive(Debug, Clone)]
pub struct CacheRecord<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

impl<V> CacheRecord<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug)]
struct Entries<V> {
    records: HashMap<String, CacheRecord<V>>,
    history: HashMap<String, Vec<V>>,
}

/// Thread-safe key/value store with TTL expiry.
///
/// Every mutation takes the write lock and every read the read lock. Nothing
/// borrowed from the inner maps is handed out; callers always get copies.
pub struct CacheStore<V> {
    entries: RwLock<Entries<V>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Entries {
                records: HashMap::new(),
                history: HashMap::new(),
            }),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Value for `key` if present and not yet expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .records
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.value.clone())
    }

    /// Insert or replace the record for `key`, valid for `ttl` from now.
    /// Last writer wins. The value is also appended to the key's history.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let expires_at = expiry(self.clock.now(), ttl);

        let mut entries = self.entries.write();
        entries
            .history
            .entry(key.clone())
            .or_default()
            .push(value.clone());
        entries
            .records
            .insert(key, CacheRecord { value, expires_at });
    }

    /// Like `set`, but leaves the history log alone.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = expiry(self.clock.now(), ttl);
        self.entries
            .write()
            .records
            .insert(key.into(), CacheRecord { value, expires_at });
    }

    /// Append to the history log without touching the cached record.
    pub fn append_history(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.write();
        entries.history.entry(key.into()).or_default().push(value);
    }

    /// Snapshot of every non-expired entry.
    pub fn list(&self) -> HashMap<String, V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .records
            .iter()
            .filter(|(_, record)| record.is_live(now))
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect()
    }

    pub fn list_history(&self, key: &str) -> Vec<V> {
        let entries = self.entries.read();
        entries.history.get(key).cloned().unwrap_or_default()
    }

    pub fn list_all_history(&self) -> HashMap<String, Vec<V>> {
        self.entries.read().history.clone()
    }

    /// Number of non-expired entries.
    pub fn live_count(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .records
            .values()
            .filter(|record| record.is_live(now))
            .count()
    }

    /// Physically remove expired records. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.records.len();
        entries.records.retain(|_, record| record.is_live(now));
        before - entries.records.len()
    }

    #[cfg(test)]
    fn stored_count(&self) -> usize {
        self.entries.read().records.len()
    }
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Periodically purge expired records until the returned handle is aborted.
pub fn spawn_sweeper<V>(store: Arc<CacheStore<V>>, every: Duration) -> tokio::task::JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                tracing::debug!("Swept {} expired cache entries", removed);
            }
        }
    })
}
