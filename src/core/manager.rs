//! Facade bundling one connection pool, one task queue and one shared cache,
//! plus the optional process-wide instance.
//!
//! ```rust,ignore
//! let manager = resource_manager::initialize(factory, ManagerConfig::from_env()?).await?;
//! let handle = manager
//!     .submit_with_connection(Priority::NORMAL, |conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
//!     .await?;
//! let one = handle.await?;
//!
//! // Elsewhere in the process:
//! let same = resource_manager::get::<SqliteConnectionFactory>()?;
//! resource_manager::shutdown().await;
//! ```

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::core::connection_pool::{ConnectionFactory, ConnectionPool, PoolStats};
use crate::core::memory_cache::{CacheStats, MemoryCache};
use crate::core::task_queue::{AsyncTaskQueue, QueueStats, TaskHandle};
use crate::core::ResourceError;
use crate::util::clock::now_ms;
use crate::util::serde::Priority;

/// Combined snapshot of every component.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Connection pool snapshot.
    pub connection_pool: PoolStats,
    /// Task queue snapshot.
    pub task_queue: QueueStats,
    /// Shared cache snapshot.
    pub cache: CacheStats,
    /// Unix epoch milliseconds when the snapshot was taken.
    pub timestamp_ms: u128,
}

/// Owns the pool, queue and cache and drives their lifecycle together.
pub struct ResourceManager<F: ConnectionFactory> {
    config: ManagerConfig,
    pool: Arc<ConnectionPool<F>>,
    queue: AsyncTaskQueue,
    cache: Arc<MemoryCache<String, Value>>,
}

impl<F: ConnectionFactory> ResourceManager<F> {
    /// Build every component. The pool opens its eager connections here; the queue
    /// stays stopped until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidConfig` if any section fails validation.
    pub fn new(factory: F, config: ManagerConfig) -> Result<Self, ResourceError> {
        config.validate().map_err(ResourceError::InvalidConfig)?;
        let pool = Arc::new(ConnectionPool::new(factory, config.pool.clone())?);
        let queue = AsyncTaskQueue::new(config.queue.clone())?;
        let cache = Arc::new(MemoryCache::new(&config.cache));
        Ok(Self {
            config,
            pool,
            queue,
            cache,
        })
    }

    /// Start the task queue workers.
    ///
    /// # Errors
    ///
    /// Propagates [`AsyncTaskQueue::start`] failures.
    pub fn start(&self) -> Result<(), ResourceError> {
        self.queue.start(Some(self.config.queue.max_workers))?;
        info!("resource manager started");
        Ok(())
    }

    /// Drain and stop the queue, close pooled connections and stop the cache sweep.
    ///
    /// Closing connections and joining the sweep thread run on the runtime's
    /// blocking threads.
    pub async fn stop(&self) {
        self.queue.stop().await;
        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        if tokio::task::spawn_blocking(move || {
            pool.shutdown();
            cache.stop_sweeper();
        })
        .await
        .is_err()
        {
            warn!("pool and cache shutdown did not complete");
        }
        info!("resource manager stopped");
    }

    /// Queue a blocking closure that runs with a pooled connection checked out.
    ///
    /// The connection is released when the closure returns, even on error. Waiting for
    /// the connection uses the pool's configured acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::QueueStopped` if the manager is not started.
    pub async fn submit_with_connection<T, G>(
        &self,
        priority: Priority,
        work: G,
    ) -> Result<TaskHandle<T>, ResourceError>
    where
        G: FnOnce(&mut F::Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        self.queue
            .submit_blocking(
                move || {
                    let mut conn = pool.checkout(pool.config().acquire_timeout())?;
                    work(&mut *conn)
                },
                priority,
            )
            .await
    }

    /// Snapshot of every component with a timestamp.
    #[must_use]
    pub fn get_all_stats(&self) -> ManagerStats {
        ManagerStats {
            connection_pool: self.pool.stats(),
            task_queue: self.queue.stats(),
            cache: self.cache.stats(),
            timestamp_ms: now_ms(),
        }
    }

    /// The connection pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool<F>> {
        &self.pool
    }

    /// The task queue.
    #[must_use]
    pub const fn queue(&self) -> &AsyncTaskQueue {
        &self.queue
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &MemoryCache<String, Value> {
        &self.cache
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

type StopFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Type-erased view of an installed manager.
trait InstalledManager: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn stop_owned(self: Arc<Self>) -> StopFuture;
}

impl<F: ConnectionFactory> InstalledManager for ResourceManager<F> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn stop_owned(self: Arc<Self>) -> StopFuture {
        Box::pin(async move { self.stop().await })
    }
}

static GLOBAL: RwLock<Option<Arc<dyn InstalledManager>>> = parking_lot::const_rwlock(None);

/// Build, start and install the process-wide manager.
///
/// A previously installed manager is replaced and stopped. Eager connection setup
/// runs on the blocking thread pool.
///
/// # Errors
///
/// - `ResourceError::InvalidConfig` if the configuration is invalid
/// - `ResourceError::Backend` if the runtime could not run the setup
pub async fn initialize<F: ConnectionFactory>(
    factory: F,
    config: ManagerConfig,
) -> Result<Arc<ResourceManager<F>>, ResourceError> {
    let manager = tokio::task::spawn_blocking(move || ResourceManager::new(factory, config))
        .await
        .map_err(|e| ResourceError::Backend(format!("manager setup failed: {e}")))??;
    let manager = Arc::new(manager);
    manager.start()?;

    let installed: Arc<dyn InstalledManager> = manager.clone();
    let previous = GLOBAL.write().replace(installed);
    if let Some(previous) = previous {
        warn!("replacing installed resource manager; stopping the previous one");
        previous.stop_owned().await;
    }

    info!("global resource manager initialized");
    Ok(manager)
}

/// The process-wide manager.
///
/// # Errors
///
/// - `ResourceError::NotInitialized` if [`initialize`] has not been called
/// - `ResourceError::ManagerTypeMismatch` if it was initialized with another factory type
pub fn get<F: ConnectionFactory>() -> Result<Arc<ResourceManager<F>>, ResourceError> {
    let installed = GLOBAL.read().clone().ok_or(ResourceError::NotInitialized)?;
    installed
        .into_any()
        .downcast::<ResourceManager<F>>()
        .map_err(|_| ResourceError::ManagerTypeMismatch)
}

/// Whether a process-wide manager is installed.
#[must_use]
pub fn is_initialized() -> bool {
    GLOBAL.read().is_some()
}

/// Uninstall and stop the process-wide manager. No-op when none is installed.
pub async fn shutdown() {
    let taken = GLOBAL.write().take();
    if let Some(manager) = taken {
        manager.stop_owned().await;
        info!("global resource manager shut down");
    }
}
