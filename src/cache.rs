// =============================================================================
// TTL + LRU Cache — prices, bars, and instrument-token maps
// =============================================================================
//
// Entries expire after a per-entry TTL (lazy, checked on read) and are also
// swept by a background task every 30 s so that an idle cache does not pin
// stale quotes in memory. When the cache is full the least-recently-used
// entry is evicted.
//
// Hit / miss / eviction / expiration counters are atomics so any thread can
// read statistics lock-free.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

struct Entry<V> {
    value: V,
    expires_at: Instant,
    /// Monotone access stamp; the smallest stamp is the LRU victim.
    last_access: u64,
}

/// Counter snapshot for dashboard payloads.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Thread-safe TTL-LRU cache keyed by string.
pub struct TtlCache<V> {
    name: &'static str,
    capacity: usize,
    default_ttl: Duration,
    map: Mutex<HashMap<String, Entry<V>>>,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, capacity: usize, default_ttl: Duration) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            default_ttl,
            map: Mutex::new(HashMap::new()),
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn stamp(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetch a value. Expired entries are removed on the way out and count
    /// as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let stamp = self.stamp();
        let mut map = self.map.lock();

        // Resolve the lookup first so the entry borrow ends before any
        // removal below.
        let mut hit = None;
        let mut expired = false;
        match map.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = stamp;
                hit = Some(entry.value.clone());
            }
            Some(_) => expired = true,
            None => {}
        }

        if let Some(value) = hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        if expired {
            map.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            trace!(cache = self.name, key, "entry expired on read");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert with the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let stamp = self.stamp();
        let mut map = self.map.lock();

        if !map.contains_key(&key) && map.len() >= self.capacity {
            // Evict the least-recently-used entry.
            if let Some(victim) = map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                map.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(cache = self.name, key = %victim, "LRU eviction");
            }
        }

        map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                last_access: stamp,
            },
        );
    }

    /// Drop an entry outright.
    pub fn invalidate(&self, key: &str) {
        self.map.lock().remove(key);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.map.lock();
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        let removed = before - map.len();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(cache = self.name, removed, "sweeper removed expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("entries", &self.map.lock().len())
            .finish()
    }
}
