//! Bounded pool of blocking connection handles with controlled overflow.
//!
//! `pool_size` connections are created eagerly; up to `max_overflow` more are created
//! on demand when the idle set is empty and shrunk back on release. A handle is owned
//! exclusively by whoever checked it out until it is released.
//!
//! Broken handles are found lazily: `release` runs the factory's liveness probe and
//! discards anything that fails it, so a dead connection is never handed out again.
//!
//! Waiters block on a `Condvar` that is signalled on every release, re-checking at
//! least every `poll_interval`. Wake-up order is not FIFO; the first waiter to
//! re-acquire the lock wins.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionPoolConfig;
use crate::core::ResourceError;

/// Creates, probes and closes the connections a pool hands out.
///
/// # Example
///
/// ```rust,ignore
/// struct Loopback;
///
/// impl ConnectionFactory for Loopback {
///     type Connection = std::net::TcpStream;
///     type Error = std::io::Error;
///
///     fn connect(&self) -> Result<Self::Connection, Self::Error> {
///         std::net::TcpStream::connect("127.0.0.1:5432")
///     }
///
///     fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
///         conn.peer_addr().map(|_| ())
///     }
/// }
/// ```
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The pooled resource.
    type Connection: Send + 'static;
    /// Error raised by connect, probe or reset.
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap liveness probe run on every release.
    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;

    /// Clear per-checkout state (e.g. roll back an open transaction) before reuse.
    fn reset(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Close a connection that is leaving the pool.
    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dereferences to the underlying connection. Hand it back with
/// [`ConnectionPool::release`].
#[derive(Debug)]
pub struct PooledConnection<C> {
    conn: C,
    id: u64,
    overflow: bool,
    generation: u64,
    created_at: Instant,
}

impl<C> PooledConnection<C> {
    /// Pool-unique handle identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether this handle currently counts against the overflow allowance.
    #[must_use]
    pub const fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// When the underlying connection was opened.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Lifetime counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounters {
    /// Connections opened by the factory.
    pub created: u64,
    /// Acquisitions served from the idle set.
    pub reused: u64,
    /// Connections closed by the pool.
    pub closed: u64,
    /// Highest number of simultaneously checked-out connections.
    pub peak_usage: usize,
    /// Factory calls that failed.
    pub creation_failures: u64,
}

/// Snapshot of pool configuration and live counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Eagerly created connections.
    pub pool_size: usize,
    /// Overflow allowance.
    pub max_overflow: usize,
    /// Connections sitting in the idle set.
    pub idle_connections: usize,
    /// Connections currently checked out.
    pub active_connections: usize,
    /// Live overflow connections (idle or checked out).
    pub overflow_count: usize,
    /// Whether the pool accepts `acquire` calls.
    pub open: bool,
    /// Lifetime counters.
    pub counters: PoolCounters,
}

struct PoolState<C> {
    idle: VecDeque<PooledConnection<C>>,
    /// Checked out handles of the current generation.
    active: usize,
    /// Live base handles (idle or active), at most `pool_size`.
    base: usize,
    /// Live overflow handles (idle or active), at most `max_overflow`.
    overflow: usize,
    open: bool,
    /// Bumped on every `initialize`; handles from older generations are closed on release.
    generation: u64,
    counters: PoolCounters,
}

impl<C> PoolState<C> {
    fn record_checkout(&mut self) {
        self.active += 1;
        self.counters.peak_usage = self.counters.peak_usage.max(self.active);
    }
}

enum ReleaseVerdict {
    Keep,
    Close(&'static str),
}

/// Bounded pool of reusable blocking connections.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    config: ConnectionPoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    /// Signalled whenever a handle returns to the idle set or the pool closes.
    available: Condvar,
    next_id: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool and eagerly open `pool_size` connections.
    ///
    /// A factory failure for one slot is logged and skipped, so the pool may start
    /// smaller than configured.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidConfig` if the configuration is invalid.
    pub fn new(factory: F, config: ConnectionPoolConfig) -> Result<Self, ResourceError> {
        config.validate().map_err(ResourceError::InvalidConfig)?;

        let pool = Self {
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_connections()),
                active: 0,
                base: 0,
                overflow: 0,
                open: false,
                generation: 0,
                counters: PoolCounters::default(),
            }),
            config,
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
        };
        pool.initialize();
        Ok(pool)
    }

    /// Open the pool and fill the idle set up to `pool_size`.
    ///
    /// No-op on an already open pool. Returns the number of idle connections.
    pub fn initialize(&self) -> usize {
        let generation = {
            let mut state = self.state.lock();
            if state.open {
                return state.idle.len();
            }
            state.open = true;
            state.generation += 1;
            state.generation
        };

        let mut opened = 0;
        for _ in 0..self.config.pool_size {
            match self.factory.connect() {
                Ok(conn) => {
                    let pooled = self.wrap(conn, false, generation);
                    let mut state = self.state.lock();
                    state.counters.created += 1;
                    if state.generation != generation || !state.open {
                        drop(state);
                        self.discard(pooled, "pool closed during initialization");
                        break;
                    }
                    state.base += 1;
                    state.idle.push_back(pooled);
                    opened += 1;
                }
                Err(e) => {
                    self.state.lock().counters.creation_failures += 1;
                    error!(error = %e, "failed to open pooled connection during initialization");
                }
            }
        }
        self.available.notify_all();

        info!(
            pool_size = self.config.pool_size,
            max_overflow = self.config.max_overflow,
            opened,
            "connection pool initialized"
        );
        opened
    }

    /// Check out a connection, waiting up to `timeout`.
    ///
    /// A timeout too large to represent as a deadline (such as `Duration::MAX`)
    /// waits until a connection frees up or the pool closes.
    ///
    /// Takes an idle connection when one exists, otherwise opens an overflow
    /// connection while `overflow < max_overflow`, otherwise waits.
    ///
    /// # Errors
    ///
    /// - `ResourceError::Exhausted` if nothing became available in time
    /// - `ResourceError::PoolClosed` if the pool is shut down
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<F::Connection>, ResourceError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut state = self.state.lock();
        let mut logged_wait = false;

        loop {
            if !state.open {
                return Err(ResourceError::PoolClosed);
            }

            if let Some(conn) = state.idle.pop_front() {
                state.counters.reused += 1;
                state.record_checkout();
                debug!(conn_id = conn.id, active = state.active, "connection checked out");
                return Ok(conn);
            }

            if state.overflow < self.config.max_overflow {
                if let Some(conn) = self.open_overflow(&mut state) {
                    return Ok(conn);
                }
            }

            let now = Instant::now();
            let mut wait = self.config.poll_interval();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    let waited_ms = now.duration_since(started).as_millis();
                    error!(waited_ms, "timed out waiting for a pooled connection");
                    return Err(ResourceError::Exhausted { waited_ms });
                }
                wait = wait.min(deadline - now);
            }
            if !logged_wait {
                warn!(active = state.active, "connection pool exhausted, waiting");
                logged_wait = true;
            }
            self.available.wait_for(&mut state, wait);
        }
    }

    /// Check out a connection using the configured default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn acquire_default(&self) -> Result<PooledConnection<F::Connection>, ResourceError> {
        self.acquire(self.config.acquire_timeout())
    }

    /// Check out a connection that is released automatically when the guard drops.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn checkout(&self, timeout: Duration) -> Result<ConnectionGuard<'_, F>, ResourceError> {
        self.acquire(timeout).map(|conn| ConnectionGuard {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Return a connection to the pool.
    ///
    /// The connection is probed and reset first. A failed probe closes it. A healthy
    /// overflow connection is closed when the idle set already holds `pool_size`
    /// entries; otherwise it goes back to the idle set, and is promoted to a base
    /// connection if base capacity was lost to earlier failures.
    pub fn release(&self, mut conn: PooledConnection<F::Connection>) {
        let health = self
            .factory
            .is_valid(&mut conn.conn)
            .and_then(|()| self.factory.reset(&mut conn.conn));

        let mut state = self.state.lock();
        let current = state.open && conn.generation == state.generation;
        if current {
            state.active = state.active.saturating_sub(1);
        }

        let verdict = if !current {
            ReleaseVerdict::Close("pool closed or re-initialized")
        } else if let Err(e) = health {
            warn!(conn_id = conn.id, error = %e, "released connection failed liveness probe");
            if conn.overflow {
                state.overflow -= 1;
            } else {
                state.base -= 1;
            }
            ReleaseVerdict::Close("failed liveness probe")
        } else if conn.overflow {
            if state.idle.len() >= self.config.pool_size {
                state.overflow -= 1;
                ReleaseVerdict::Close("overflow no longer needed")
            } else {
                if state.base < self.config.pool_size {
                    state.overflow -= 1;
                    state.base += 1;
                    conn.overflow = false;
                    debug!(conn_id = conn.id, "overflow connection promoted to base");
                }
                ReleaseVerdict::Keep
            }
        } else {
            ReleaseVerdict::Keep
        };

        match verdict {
            ReleaseVerdict::Keep => {
                debug!(conn_id = conn.id, idle = state.idle.len() + 1, "connection returned to pool");
                state.idle.push_back(conn);
                drop(state);
                self.available.notify_one();
            }
            ReleaseVerdict::Close(reason) => {
                drop(state);
                self.discard(conn, reason);
            }
        }
    }

    /// Current configuration and counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            pool_size: self.config.pool_size,
            max_overflow: self.config.max_overflow,
            idle_connections: state.idle.len(),
            active_connections: state.active,
            overflow_count: state.overflow,
            open: state.open,
            counters: state.counters,
        }
    }

    /// Live connections owned by the current generation (idle or checked out).
    #[must_use]
    pub fn live_connections(&self) -> usize {
        let state = self.state.lock();
        state.base + state.overflow
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    /// Whether the pool accepts `acquire` calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Close every idle connection and refuse further `acquire` calls until
    /// [`initialize`](Self::initialize) is called again.
    ///
    /// Connections checked out at this point are closed when they are released.
    pub fn shutdown(&self) {
        let (idle, outstanding) = {
            let mut state = self.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.base = 0;
            state.overflow = 0;
            let outstanding = std::mem::take(&mut state.active);
            (std::mem::take(&mut state.idle), outstanding)
        };
        self.available.notify_all();

        let closed = idle.len();
        for conn in idle {
            self.discard(conn, "pool shutdown");
        }
        info!(closed, outstanding, "connection pool shut down");
    }

    /// Reserve an overflow slot and open a connection with the lock released.
    fn open_overflow(
        &self,
        state: &mut MutexGuard<'_, PoolState<F::Connection>>,
    ) -> Option<PooledConnection<F::Connection>> {
        state.overflow += 1;
        let generation = state.generation;

        let result = MutexGuard::unlocked(state, || self.factory.connect());
        match result {
            Ok(conn) => {
                state.counters.created += 1;
                let pooled = self.wrap(conn, true, generation);
                if !state.open || state.generation != generation {
                    // Shut down while we were connecting; shutdown already reset the counts.
                    MutexGuard::unlocked(state, || self.discard(pooled, "pool closed while connecting"));
                    return None;
                }
                state.record_checkout();
                debug!(
                    conn_id = pooled.id,
                    overflow = state.overflow,
                    "overflow connection opened"
                );
                Some(pooled)
            }
            Err(e) => {
                if state.open && state.generation == generation {
                    state.overflow -= 1;
                }
                state.counters.creation_failures += 1;
                error!(error = %e, "failed to open overflow connection");
                None
            }
        }
    }

    fn wrap(&self, conn: F::Connection, overflow: bool, generation: u64) -> PooledConnection<F::Connection> {
        PooledConnection {
            conn,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            overflow,
            generation,
            created_at: Instant::now(),
        }
    }

    /// Close a connection that is leaving the pool. Must be called without the lock held.
    fn discard(&self, conn: PooledConnection<F::Connection>, reason: &'static str) {
        debug!(conn_id = conn.id, reason, "closing connection");
        self.factory.close(conn.conn);
        self.state.lock().counters.closed += 1;
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Async variant of [`acquire`](Self::acquire); the wait runs on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire), plus `ResourceError::Backend` if the
    /// blocking wait could not run.
    pub async fn acquire_async(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, ResourceError> {
        let pool = Arc::clone(self);
        tokio::task::spawn_blocking(move || pool.acquire(timeout))
            .await
            .map_err(|e| ResourceError::Backend(format!("acquire task failed: {e}")))?
    }
}

/// RAII checkout that calls [`ConnectionPool::release`] on drop.
pub struct ConnectionGuard<'a, F: ConnectionFactory> {
    pool: &'a ConnectionPool<F>,
    conn: Option<PooledConnection<F::Connection>>,
}

impl<F: ConnectionFactory> ConnectionGuard<'_, F> {
    /// The pooled handle behind this guard.
    #[must_use]
    pub fn pooled(&self) -> Option<&PooledConnection<F::Connection>> {
        self.conn.as_ref()
    }
}

impl<F: ConnectionFactory> Deref for ConnectionGuard<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        // Only `drop` takes the connection out.
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("connection guard used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for ConnectionGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("connection guard used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for ConnectionGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug)]
    struct MockConn {
        healthy: bool,
    }

    #[derive(Default)]
    struct MockFactory {
        fail_connect: AtomicBool,
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    #[derive(Debug)]
    struct MockError;

    impl std::fmt::Display for MockError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("mock failure")
        }
    }

    impl ConnectionFactory for Arc<MockFactory> {
        type Connection = MockConn;
        type Error = MockError;

        fn connect(&self) -> Result<MockConn, MockError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(MockError);
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn { healthy: true })
        }

        fn is_valid(&self, conn: &mut MockConn) -> Result<(), MockError> {
            if conn.healthy {
                Ok(())
            } else {
                Err(MockError)
            }
        }

        fn close(&self, _conn: MockConn) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(size: usize, overflow: usize) -> (Arc<MockFactory>, ConnectionPool<Arc<MockFactory>>) {
        let factory = Arc::new(MockFactory::default());
        let config = ConnectionPoolConfig::new()
            .with_pool_size(size)
            .with_max_overflow(overflow);
        let pool = ConnectionPool::new(Arc::clone(&factory), config).unwrap();
        (factory, pool)
    }

    #[test]
    fn test_eager_initialization() {
        let (factory, pool) = pool(3, 1);
        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 3);
        assert_eq!(stats.counters.created, 3);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_initialization_failure_is_not_fatal() {
        let factory = Arc::new(MockFactory::default());
        factory.fail_connect.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new(Arc::clone(&factory), ConnectionPoolConfig::new().with_pool_size(2))
            .unwrap();
        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(stats.counters.creation_failures, 2);
        assert!(stats.open);
    }

    #[test]
    fn test_overflow_then_exhausted() {
        let (_f, pool) = pool(2, 1);
        let a = pool.acquire(Duration::from_millis(50)).unwrap();
        let b = pool.acquire(Duration::from_millis(50)).unwrap();
        let c = pool.acquire(Duration::from_millis(50)).unwrap();
        assert!(!a.is_overflow() && !b.is_overflow());
        assert!(c.is_overflow());

        let err = pool.acquire(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ResourceError::Exhausted { .. }));
        assert_eq!(pool.stats().counters.peak_usage, 3);

        pool.release(a);
        pool.release(b);
        pool.release(c);
    }

    #[test]
    fn test_overflow_closed_when_idle_full() {
        let (factory, pool) = pool(1, 1);
        let base = pool.acquire(Duration::from_millis(10)).unwrap();
        let extra = pool.acquire(Duration::from_millis(10)).unwrap();
        pool.release(base);
        pool.release(extra);

        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 1);
        assert_eq!(stats.overflow_count, 0);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broken_connection_discarded() {
        let (factory, pool) = pool(1, 0);
        let mut conn = pool.acquire(Duration::from_millis(10)).unwrap();
        conn.healthy = false;
        pool.release(conn);

        assert_eq!(pool.stats().idle_connections, 0);
        assert_eq!(pool.live_connections(), 0);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert!(pool.acquire(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn test_overflow_promoted_after_base_loss() {
        let (_f, pool) = pool(1, 1);
        let mut base = pool.acquire(Duration::from_millis(10)).unwrap();
        let extra = pool.acquire(Duration::from_millis(10)).unwrap();
        base.healthy = false;
        pool.release(base);
        pool.release(extra);

        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 1);
        assert_eq!(stats.overflow_count, 0);
        let again = pool.acquire(Duration::from_millis(10)).unwrap();
        assert!(!again.is_overflow());
        pool.release(again);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (_f, pool) = pool(1, 0);
        {
            let guard = pool.checkout(Duration::from_millis(10)).unwrap();
            assert!(guard.healthy);
            assert_eq!(pool.stats().active_connections, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.idle_connections, 1);
    }

    #[test]
    fn test_shutdown_and_reinitialize() {
        let (factory, pool) = pool(2, 0);
        let held = pool.acquire(Duration::from_millis(10)).unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.acquire(Duration::from_millis(10)),
            Err(ResourceError::PoolClosed)
        ));

        pool.release(held);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);

        assert_eq!(pool.initialize(), 2);
        assert!(pool.acquire(Duration::from_millis(10)).is_ok());
    }
}
