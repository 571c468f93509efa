//! Time-bounded cache in front of the data source.
//!
//! Backed by `DashMap`: operations on one key are serialized by its shard
//! lock, and keys in other shards are never blocked. An entry older than
//! the TTL is treated exactly like a missing one and removed on read.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::data::OptionsSnapshot;

/// Default freshness window (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cached value with its insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent map with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that stores nothing; every lookup misses.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh value for `key`, or `None` on a miss or an expired entry.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.enabled {
            if let Some(entry) = self.entries.get(key) {
                if !entry.is_stale(self.ttl) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
            // Re-check under the write lock; another task may have refreshed it.
            self.entries.remove_if(key, |_, entry| entry.is_stale(self.ttl));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Instant::now());
    }

    fn put_at(&self, key: K, value: V, inserted_at: Instant) {
        if !self.enabled {
            return;
        }
        self.entries.insert(key, CacheEntry { value, inserted_at });
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(self.ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Ticker plus the query that produced the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub ticker: String,
    pub min_dte: i64,
    pub max_dte: i64,
    pub evaluation_date: NaiveDate,
}

impl ChainKey {
    pub fn new(ticker: &str, min_dte: i64, max_dte: i64, evaluation_date: NaiveDate) -> Self {
        Self {
            ticker: ticker.to_string(),
            min_dte,
            max_dte,
            evaluation_date,
        }
    }
}

/// Snapshot cache shared by all fetch workers of a run.
pub type ChainCache = TtlCache<ChainKey, Arc<OptionsSnapshot>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_hit_and_miss() {
        let cache: TtlCache<String, u32> = TtlCache::default();
        assert_eq!(cache.get(&"SPY".to_string()), None);

        cache.put("SPY".to_string(), 7);
        assert_eq!(cache.get(&"SPY".to_string()), Some(7));
        assert_eq!(cache.get(&"QQQ".to_string()), None);

        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(20));
        cache.put("SPY", 1);
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&"SPY"), None);
        // Expired entries are removed on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_backdated_entry_is_absent() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(50));
        let old = Instant::now() - Duration::from_millis(60);
        cache.put_at("SPY", 1, old);
        cache.put("QQQ", 2);

        assert_eq!(cache.get(&"SPY"), None);
        assert_eq!(cache.get(&"QQQ"), Some(2));
    }

    #[test]
    fn test_purge_expired() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(20));
        cache.put("SPY", 1);
        cache.put("QQQ", 2);
        thread::sleep(Duration::from_millis(40));
        cache.put("IWM", 3);

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache: TtlCache<&str, u32> = TtlCache::disabled();
        cache.put("SPY", 1);
        assert!(!cache.is_enabled());
        assert_eq!(cache.get(&"SPY"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let cache: Arc<TtlCache<String, usize>> = Arc::new(TtlCache::default());

        thread::scope(|s| {
            for i in 0..8 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    for j in 0..100 {
                        cache.put(format!("T{i}-{j}"), i * 1000 + j);
                    }
                });
            }
        });

        assert_eq!(cache.len(), 800);
        assert_eq!(cache.get(&"T3-42".to_string()), Some(3042));
    }
}
