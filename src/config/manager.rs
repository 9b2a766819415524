//! Connection pool, task queue and cache configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Connections created eagerly at initialization.
    pub pool_size: usize,
    /// Extra connections created on demand beyond `pool_size`.
    pub max_overflow: usize,
    /// Default wait for `acquire` in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Longest a waiter sleeps before re-checking the idle set.
    pub poll_interval_ms: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_overflow: 5,
            acquire_timeout_ms: 10_000,
            poll_interval_ms: 100,
        }
    }
}

impl ConnectionPoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of eagerly created connections.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the overflow allowance.
    #[must_use]
    pub const fn with_max_overflow(mut self, max_overflow: usize) -> Self {
        self.max_overflow = max_overflow;
        self
    }

    /// Set the default acquire timeout. Saturates at `u64::MAX` milliseconds.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Upper bound on live connections.
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.pool_size + self.max_overflow
    }

    /// Default acquire timeout as a `Duration`.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Waiter re-check interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Worker loops started by the manager.
    pub max_workers: usize,
    /// Entries held before `submit` applies backpressure.
    pub max_queue_size: usize,
    /// OS threads available to blocking callables.
    pub blocking_threads: usize,
    /// How long an idle worker waits before re-checking for shutdown.
    pub poll_timeout_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_queue_size: 1000,
            blocking_threads: 10,
            poll_timeout_ms: 1000,
        }
    }
}

impl TaskQueueConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the blocking pool to the host's logical CPUs.
    #[must_use]
    pub fn for_host() -> Self {
        Self {
            blocking_threads: num_cpus::get().max(2),
            ..Self::default()
        }
    }

    /// Set the number of worker loops.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the blocking thread count.
    #[must_use]
    pub const fn with_blocking_threads(mut self, blocking_threads: usize) -> Self {
        self.blocking_threads = blocking_threads;
        self
    }

    /// Worker poll timeout as a `Duration`.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Validate queue configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be greater than 0".into());
        }
        if self.blocking_threads == 0 {
            return Err("blocking_threads must be greater than 0".into());
        }
        if self.poll_timeout_ms == 0 {
            return Err("poll_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Memory cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries.
    pub max_size: usize,
    /// TTL in milliseconds applied when `set` receives no explicit TTL. Zero disables expiry.
    pub default_ttl_ms: u64,
    /// Period of the background expiry sweep in milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 3_600_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl MemoryCacheConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry bound.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the default TTL. `Duration::ZERO` disables expiry.
    ///
    /// Any non-zero TTL keeps at least one millisecond.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = nonzero_millis(ttl);
        self
    }

    /// Set the sweep period. Any non-zero period keeps at least one millisecond.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = nonzero_millis(interval);
        self
    }

    /// Default TTL, or `None` when entries never expire by default.
    #[must_use]
    pub const fn default_ttl(&self) -> Option<Duration> {
        if self.default_ttl_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.default_ttl_ms))
        }
    }

    /// Sweep period as a `Duration`.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Validate cache configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".into());
        }
        if self.cleanup_interval_ms == 0 {
            return Err("cleanup_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration for the resource manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Connection pool section.
    pub pool: ConnectionPoolConfig,
    /// Task queue section.
    pub queue: TaskQueueConfig,
    /// Memory cache section.
    pub cache: MemoryCacheConfig,
}

impl ManagerConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.queue.validate().map_err(|e| format!("queue invalid: {e}"))?;
        self.cache.validate().map_err(|e| format!("cache invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by `RESOURCE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        env_override("RESOURCE_POOL_SIZE", &mut cfg.pool.pool_size)?;
        env_override("RESOURCE_MAX_OVERFLOW", &mut cfg.pool.max_overflow)?;
        env_override("RESOURCE_ACQUIRE_TIMEOUT_MS", &mut cfg.pool.acquire_timeout_ms)?;
        env_override("RESOURCE_QUEUE_WORKERS", &mut cfg.queue.max_workers)?;
        env_override("RESOURCE_QUEUE_SIZE", &mut cfg.queue.max_queue_size)?;
        env_override("RESOURCE_BLOCKING_THREADS", &mut cfg.queue.blocking_threads)?;
        env_override("RESOURCE_CACHE_MAX_SIZE", &mut cfg.cache.max_size)?;
        env_override("RESOURCE_CACHE_TTL_MS", &mut cfg.cache.default_ttl_ms)?;
        env_override("RESOURCE_CACHE_CLEANUP_MS", &mut cfg.cache.cleanup_interval_ms)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn nonzero_millis(d: Duration) -> u64 {
    if d.is_zero() {
        0
    } else {
        saturating_millis(d).max(1)
    }
}

fn env_override<T>(key: &str, target: &mut T) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| format!("{key}={raw:?} is not valid: {e}"))?;
            Ok(())
        }
        Err(std::env::VarError::NotPresent) => Ok(()),
        Err(e) => Err(format!("{key} unreadable: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.pool.pool_size, 10);
        assert_eq!(cfg.pool.max_overflow, 5);
        assert_eq!(cfg.pool.max_connections(), 15);
        assert_eq!(cfg.queue.max_workers, 10);
        assert_eq!(cfg.queue.max_queue_size, 1000);
        assert_eq!(cfg.cache.default_ttl(), Some(Duration::from_secs(3600)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let cache = MemoryCacheConfig::new().with_default_ttl(Duration::ZERO);
        assert_eq!(cache.default_ttl(), None);
    }

    #[test]
    fn test_sub_second_durations_are_kept() {
        let cache = MemoryCacheConfig::new()
            .with_default_ttl(Duration::from_millis(200))
            .with_cleanup_interval(Duration::from_micros(10));
        assert_eq!(cache.default_ttl(), Some(Duration::from_millis(200)));
        assert_eq!(cache.cleanup_interval(), Duration::from_millis(1));
        assert!(cache.validate().is_ok());

        let tiny = MemoryCacheConfig::new().with_default_ttl(Duration::from_nanos(1));
        assert_eq!(tiny.default_ttl(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let pool = ConnectionPoolConfig::new().with_acquire_timeout(Duration::MAX);
        assert_eq!(pool.acquire_timeout_ms, u64::MAX);

        let cache = MemoryCacheConfig::new().with_default_ttl(Duration::MAX);
        assert_eq!(cache.default_ttl_ms, u64::MAX);
    }

    #[test]
    fn test_env_override_parses_and_rejects() {
        let mut value = 3usize;
        std::env::set_var("RESOURCE_TEST_ONLY_OVERRIDE", " 42 ");
        env_override("RESOURCE_TEST_ONLY_OVERRIDE", &mut value).unwrap();
        assert_eq!(value, 42);

        std::env::set_var("RESOURCE_TEST_ONLY_OVERRIDE", "many");
        assert!(env_override("RESOURCE_TEST_ONLY_OVERRIDE", &mut value).is_err());
        assert_eq!(value, 42);
        std::env::remove_var("RESOURCE_TEST_ONLY_OVERRIDE");

        env_override("RESOURCE_TEST_ONLY_MISSING", &mut value).unwrap();
        assert_eq!(value, 42);
    }
}
