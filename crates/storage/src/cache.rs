use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;

struct CacheEntry<V> {
    inserted_at: Instant,
    value: V,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, expired or not.
    pub entries: usize,
    /// Entries past their TTL that no lookup has evicted yet.
    pub expired: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
    /// Entry bound; 0 means unbounded.
    pub capacity: usize,
}

/// TTL cache for scan results.
///
/// Expiry is checked lazily on `get`; there is no background sweep. The
/// optional capacity bound drops the least-recently-used entry on insert
/// so idle stretches cannot grow memory without limit.
pub struct ResultCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            ttl,
            capacity,
            entries: Mutex::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &quantscan_core::CacheConfig) -> Self {
        Self::new(config.ttl(), config.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`. An expired entry is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().expect("result cache lock poisoned");
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            entries.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "evicted expired cache entry");
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key`, resetting its age.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().expect("result cache lock poisoned");
        entries.put(
            key.into(),
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("result cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("result cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().expect("result cache lock poisoned");
        let expired = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .count();
        CacheStats {
            entries: entries.len(),
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
            capacity: self.capacity,
        }
    }
}
