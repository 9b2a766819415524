//! Memoizing wrapper around a function, backed by a private [`MemoryCache`].
//!
//! Results are keyed by the SHA-256 of `"{name}|{args:?}"`, so two calls with
//! equal arguments (by `Debug` rendering) share one entry. Fallible functions only
//! cache their `Ok` values.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::MemoryCacheConfig;
use crate::core::memory_cache::{CacheStats, MemoryCache};

/// Entry bound of the private cache behind every [`CachedFn`].
pub const CACHED_FN_MAX_SIZE: usize = 500;

/// A function whose results are cached per argument value.
pub struct CachedFn<A: ?Sized, R, F> {
    name: String,
    ttl: Duration,
    func: F,
    key_fn: Option<Box<dyn Fn(&A) -> String + Send + Sync>>,
    cache: MemoryCache<String, R>,
    _args: PhantomData<fn(&A)>,
}

/// Wrap `func` so repeated calls with equal arguments reuse the stored result for `ttl`.
///
/// `Duration::ZERO` keeps results until they are evicted.
pub fn cache_result<A, R, F>(name: impl Into<String>, ttl: Duration, func: F) -> CachedFn<A, R, F>
where
    A: Debug + ?Sized,
    R: Clone + Send + 'static,
    F: Fn(&A) -> R,
{
    CachedFn::new(name.into(), ttl, func)
}

/// Wrap a fallible `func`; only `Ok` results are stored.
pub fn cache_fallible<A, R, E, F>(
    name: impl Into<String>,
    ttl: Duration,
    func: F,
) -> CachedFn<A, R, F>
where
    A: Debug + ?Sized,
    R: Clone + Send + 'static,
    F: Fn(&A) -> Result<R, E>,
{
    CachedFn::new(name.into(), ttl, func)
}

impl<A, R, F> CachedFn<A, R, F>
where
    A: Debug + ?Sized,
    R: Clone + Send + 'static,
{
    fn new(name: String, ttl: Duration, func: F) -> Self {
        let config = MemoryCacheConfig::new()
            .with_max_size(CACHED_FN_MAX_SIZE)
            .with_default_ttl(ttl);
        Self {
            name,
            ttl,
            func,
            key_fn: None,
            cache: MemoryCache::new(&config),
            _args: PhantomData,
        }
    }

    /// Derive cache keys with `key_fn` instead of hashing the `Debug` rendering.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: impl Fn(&A) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Cache key for `args`: the custom key function's output, or the hex SHA-256 of
    /// the function name and argument rendering.
    pub fn key_for(&self, args: &A) -> String {
        if let Some(key_fn) = &self.key_fn {
            return key_fn(args);
        }
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{args:?}").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Drop the stored result for `args`. Returns whether one existed.
    pub fn invalidate(&self, args: &A) -> bool {
        self.cache.delete(&self.key_for(args))
    }

    /// Drop every stored result.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Counters of the private cache.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Name the results are keyed under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the stored result for `args`, computing and storing it on a miss.
    pub fn call(&self, args: &A) -> R
    where
        F: Fn(&A) -> R,
    {
        let key = self.key_for(args);
        if let Some(hit) = self.cache.get(&key) {
            debug!(function = %self.name, "cached result reused");
            return hit;
        }
        let value = (self.func)(args);
        self.cache.set(key, value.clone(), Some(self.ttl));
        value
    }

    /// Like [`call`](Self::call) for a fallible function; errors are returned and not stored.
    ///
    /// # Errors
    ///
    /// Whatever the wrapped function returns.
    pub fn try_call<E>(&self, args: &A) -> Result<R, E>
    where
        F: Fn(&A) -> Result<R, E>,
    {
        let key = self.key_for(args);
        if let Some(hit) = self.cache.get(&key) {
            debug!(function = %self.name, "cached result reused");
            return Ok(hit);
        }
        let value = (self.func)(args)?;
        self.cache.set(key, value.clone(), Some(self.ttl));
        Ok(value)
    }
}
