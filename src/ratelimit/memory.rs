//! In-process counter store with lazy expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::CounterStore;
use crate::config::ExpiryPolicy;
use crate::error::Result;

/// A single counter and the instant its window started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Current total
    pub count: u64,
    /// Lifetime of the record, `None` for no expiry
    pub ttl: Option<Duration>,
    /// Expiry anchor
    pub created_at: Instant,
}

impl CounterRecord {
    fn new(count: u64, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            count,
            ttl,
            created_at: now,
        }
    }

    /// Whether the record has outlived its ttl at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }
}

/// Increments between two full sweeps of expired records.
const SWEEP_INTERVAL: u64 = 1024;

/// Counter store backed by a concurrent in-process map.
///
/// Expired records are evicted when next touched, and the whole map is swept
/// every `SWEEP_INTERVAL` increments so keys that are never touched again
/// do not pile up.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, CounterRecord>,
    expiry: ExpiryPolicy,
    increments: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(expiry: ExpiryPolicy) -> Self {
        Self {
            records: DashMap::new(),
            expiry,
            increments: AtomicU64::new(0),
        }
    }

    /// Drop every expired record and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.records.len(),
                "Purged expired counters"
            );
        }
        removed
    }

    /// Read a live record, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<CounterRecord> {
        let now = Instant::now();
        let record = *self.records.get(key)?;

        if record.is_expired(now) {
            self.records.remove_if(key, |_, r| r.is_expired(now));
            return None;
        }

        Some(record)
    }

    /// Number of stored records, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn increment_sync(&self, key: &str, amount: u64, ttl: Option<Duration>) -> u64 {
        let now = Instant::now();

        // The entry holds the shard lock, so read-modify-write is atomic per key.
        let count = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.is_expired(now) {
                    trace!(key = %key, "Counter expired, starting a new window");
                    *record = CounterRecord::new(amount, ttl, now);
                } else {
                    record.count = record.count.saturating_add(amount);
                    if self.expiry == ExpiryPolicy::Sliding {
                        record.ttl = ttl;
                        record.created_at = now;
                    }
                }
                record.count
            }
            Entry::Vacant(entry) => entry.insert(CounterRecord::new(amount, ttl, now)).count,
        };

        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
        count
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<u64> {
        Ok(self.increment_sync(key, amount, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_accumulates() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);

        assert_eq!(store.increment("test:incr", 1, None).await.unwrap(), 1);
        assert_eq!(store.increment("test:incr", 5, None).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);

        store.increment("a", 3, None).await.unwrap();
        store.increment("b", 4, None).await.unwrap();

        assert_eq!(store.get("a").unwrap().count, 3);
        assert_eq!(store.get("b").unwrap().count, 4);
        assert!(store.get("c").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_ttl() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);
        let ttl = Duration::from_millis(250);

        store.increment("key", 2, Some(ttl)).await.unwrap();
        assert!(store.get("key").is_some());

        // Exactly at the ttl the record is still live.
        tokio::time::advance(ttl).await;
        assert!(store.get("key").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("key").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_after_expiry_resets_count() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);
        let ttl = Duration::from_secs(1);

        store.increment("key", 7, Some(ttl)).await.unwrap();
        tokio::time::advance(Duration::from_millis(1001)).await;

        assert_eq!(store.increment("key", 3, Some(ttl)).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_expiry_is_not_refreshed() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);
        let ttl = Duration::from_secs(10);

        store.increment("key", 1, Some(ttl)).await.unwrap();
        let created_at = store.get("key").unwrap().created_at;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.increment("key", 1, Some(ttl)).await.unwrap(), 2);
        assert_eq!(store.get("key").unwrap().created_at, created_at);

        // 11s after creation the window is over even though the last hit was 5s ago.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.get("key").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_expiry_is_refreshed() {
        let store = MemoryStore::new(ExpiryPolicy::Sliding);
        let ttl = Duration::from_secs(10);

        store.increment("key", 1, Some(ttl)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        store.increment("key", 1, Some(ttl)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.get("key").unwrap().count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ttl_never_expires() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);

        store.increment("key", 1, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(86400)).await;

        assert_eq!(store.get("key").unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);

        store.increment("short", 1, Some(Duration::from_secs(1))).await.unwrap();
        store.increment("long", 1, Some(Duration::from_secs(60))).await.unwrap();
        store.increment("forever", 1, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("short").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_untouched_expired_keys_are_swept() {
        let store = MemoryStore::new(ExpiryPolicy::Fixed);

        store.increment("gone", 1, Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // "gone" is never read again; the periodic sweep still drops it.
        for _ in 1..SWEEP_INTERVAL {
            store.increment("busy", 1, None).await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("busy").unwrap().count, SWEEP_INTERVAL - 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryStore::new(ExpiryPolicy::Fixed));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("shared", 1, None).await.unwrap() })
            })
            .collect();

        let mut totals = Vec::new();
        for handle in handles {
            totals.push(handle.await.unwrap());
        }
        totals.sort_unstable();

        assert_eq!(totals, (1..=100).collect::<Vec<u64>>());
    }
}
