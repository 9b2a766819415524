//! Bounded in-process cache with per-entry TTL and LRU eviction.
//!
//! Expired entries are removed lazily when read and by a background sweep thread,
//! so keys that are never read again do not pin memory. Every read and write is
//! serialized through one mutex; callers never observe a partially updated entry.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MemoryCacheConfig;

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheItem<V> {
    /// Stored value.
    pub value: V,
    /// When the value was stored.
    pub created_at: Instant,
    /// When the value stops being served, if ever.
    pub expires_at: Option<Instant>,
    /// Number of `get` hits since the value was stored.
    pub access_count: u64,
    /// Time of the most recent store or hit.
    pub last_access: Instant,
}

impl<V> CacheItem<V> {
    fn new(value: V, now: Instant, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() { None } else { now.checked_add(ttl) };
        Self {
            value,
            created_at: now,
            expires_at,
            access_count: 0,
            last_access: now,
        }
    }

    /// Whether the entry is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Lifetime counters for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    /// Reads that returned a live value.
    pub hits: u64,
    /// Reads that found nothing or an expired value.
    pub misses: u64,
    /// Stores.
    pub sets: u64,
    /// Explicit deletions of present keys.
    pub deletes: u64,
    /// Removals by expiry or LRU pressure.
    pub evictions: u64,
}

/// Snapshot of cache size, hit rate and counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entry bound.
    pub max_size: usize,
    /// Entries currently held, including expired ones not yet swept.
    pub current_size: usize,
    /// Hits as a percentage of all reads, rounded to two decimals.
    pub hit_rate: f64,
    /// Lifetime counters.
    pub counters: CacheCounters,
}

struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, CacheItem<V>>,
    counters: CacheCounters,
}

impl<K: Hash + Eq + Clone, V> CacheState<K, V> {
    fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, item)| item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.counters.evictions += expired.len() as u64;
        expired.len()
    }
}

/// Stop signal shared with the sweep thread.
struct SweepControl {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// TTL + LRU memory cache.
pub struct MemoryCache<K: Hash + Eq, V> {
    state: Arc<Mutex<CacheState<K, V>>>,
    max_size: usize,
    default_ttl: Duration,
    sweep: Arc<SweepControl>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache and start its background sweep.
    ///
    /// A zero `max_size` is treated as 1.
    #[must_use]
    pub fn new(config: &MemoryCacheConfig) -> Self {
        let max_size = config.max_size.max(1);
        let state = Arc::new(Mutex::new(CacheState {
            entries: LruCache::unbounded(),
            counters: CacheCounters::default(),
        }));
        let sweep = Arc::new(SweepControl {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let interval = config.cleanup_interval().max(Duration::from_millis(1));
        let sweeper = spawn_sweeper(Arc::downgrade(&state), Arc::clone(&sweep), interval);

        info!(
            max_size,
            default_ttl_ms = config.default_ttl_ms,
            "memory cache initialized"
        );

        Self {
            state,
            max_size,
            default_ttl: config.default_ttl().unwrap_or(Duration::ZERO),
            sweep,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Read a live value and mark it most recently used.
    ///
    /// An expired entry is deleted and counted as both a miss and an eviction.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.peek(key) {
            None => {
                state.counters.misses += 1;
                return None;
            }
            Some(item) => item.is_expired(now),
        };

        if expired {
            state.entries.pop(key);
            state.counters.misses += 1;
            state.counters.evictions += 1;
            return None;
        }

        let item = state.entries.get_mut(key)?;
        item.access_count += 1;
        item.last_access = now;
        let value = item.value.clone();
        state.counters.hits += 1;
        Some(value)
    }

    /// [`get`](Self::get), returning `default` on a miss.
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Store a value as most recently used.
    ///
    /// `ttl` of `None` applies the configured default; `Some(Duration::ZERO)` never
    /// expires. Inserting a new key into a full cache evicts the least recently used key.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.entries.len() >= self.max_size && !state.entries.contains(&key) {
            if state.entries.pop_lru().is_some() {
                state.counters.evictions += 1;
                debug!(max_size = self.max_size, "evicted least recently used entry");
            }
        }

        state.entries.put(key, CacheItem::new(value, now, ttl));
        state.counters.sets += 1;
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        if state.entries.pop(key).is_some() {
            state.counters.deletes += 1;
            true
        } else {
            false
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let cleared = state.entries.len();
        state.entries.clear();
        info!(cleared, "memory cache cleared");
    }

    /// Whether a live value is stored for `key`. Does not touch LRU order or counters.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|item| !item.is_expired(now))
    }

    /// Copy of a live entry with its bookkeeping. Does not touch LRU order or counters.
    pub fn peek_item<Q>(&self, key: &Q) -> Option<CacheItem<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .filter(|item| !item.is_expired(now))
            .cloned()
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.state.lock().remove_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "expired cache entries removed");
        }
        removed
    }

    /// Entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size, hit rate and counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let counters = state.counters;
        let total = counters.hits + counters.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (counters.hits as f64 / total as f64 * 10_000.0).round() / 100.0
        };
        CacheStats {
            max_size: self.max_size,
            current_size: state.entries.len(),
            hit_rate,
            counters,
        }
    }

    /// Stop the background sweep and wait for its thread to exit.
    pub fn stop_sweeper(&self) {
        *self.sweep.stopped.lock() = true;
        self.sweep.wake.notify_all();
        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                warn!("cache sweep thread panicked");
            }
        }
    }
}

impl<K: Hash + Eq, V> Drop for MemoryCache<K, V> {
    fn drop(&mut self) {
        // Signal only; the thread also exits once it can no longer upgrade its Weak.
        *self.sweep.stopped.lock() = true;
        self.sweep.wake.notify_all();
    }
}

fn spawn_sweeper<K, V>(
    state: Weak<Mutex<CacheState<K, V>>>,
    control: Arc<SweepControl>,
    interval: Duration,
) -> Option<JoinHandle<()>>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("cache-sweeper".into())
        .spawn(move || loop {
            {
                let mut stopped = control.stopped.lock();
                if !*stopped {
                    control.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }

            let Some(state) = state.upgrade() else {
                break;
            };
            let removed = state.lock().remove_expired(Instant::now());
            if removed > 0 {
                debug!(removed, "cache sweep removed expired entries");
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to start cache sweep thread; expiry will be lazy only");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> MemoryCache<String, i32> {
        MemoryCache::new(
            &MemoryCacheConfig::new()
                .with_max_size(max_size)
                .with_default_ttl(Duration::ZERO),
        )
    }

    #[test]
    fn test_get_miss_and_hit() {
        let c = cache(4);
        assert_eq!(c.get("a"), None);
        c.set("a".into(), 1, None);
        assert_eq!(c.get("a"), Some(1));
        assert_eq!(c.get_or("b", -1), -1);

        let stats = c.stats();
        assert_eq!(stats.counters.hits, 1);
        assert_eq!(stats.counters.misses, 2);
        assert_eq!(stats.counters.sets, 1);
        assert!((stats.hit_rate - 33.33).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction_respects_reads() {
        let c = cache(2);
        c.set("a".into(), 1, None);
        c.set("b".into(), 2, None);
        assert_eq!(c.get("a"), Some(1));
        c.set("c".into(), 3, None);

        assert!(c.contains("a"));
        assert!(c.contains("c"));
        assert_eq!(c.get("b"), None);
        assert_eq!(c.stats().counters.evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let c = cache(2);
        c.set("a".into(), 1, None);
        c.set("b".into(), 2, None);
        c.set("a".into(), 10, None);
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().counters.evictions, 0);
        assert_eq!(c.get("a"), Some(10));
    }

    #[test]
    fn test_access_bookkeeping() {
        let c = cache(2);
        c.set("k".into(), 5, None);
        c.get("k");
        c.get("k");
        let item = c.peek_item("k").unwrap();
        assert_eq!(item.access_count, 2);
        assert!(item.last_access >= item.created_at);
        assert!(item.expires_at.is_none());
    }

    #[test]
    fn test_expired_entry_counted_once() {
        let c = cache(4);
        c.set("t".into(), 1, Some(Duration::from_millis(30)));
        thread::sleep(Duration::from_millis(60));
        assert!(!c.contains("t"));
        assert_eq!(c.cleanup_expired(), 1);
        assert_eq!(c.get("t"), None);

        let counters = c.stats().counters;
        assert_eq!(counters.evictions, 1);
        assert_eq!(counters.misses, 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let c = cache(4);
        c.set("x".into(), 1, None);
        c.set("y".into(), 2, None);
        assert!(c.delete("x"));
        assert!(!c.delete("x"));
        assert_eq!(c.stats().counters.deletes, 1);
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn test_stop_sweeper_is_idempotent() {
        let c = cache(1);
        c.stop_sweeper();
        c.stop_sweeper();
        c.set("still".into(), 1, None);
        assert_eq!(c.get("still"), Some(1));
    }
}
