//! Connection pooling, task execution and caching components.

pub mod blocking_pool;
pub mod cached;
pub mod connection_pool;
pub mod error;
pub mod manager;
pub mod memory_cache;
pub mod task_queue;

pub use blocking_pool::BlockingPool;
pub use cached::{cache_fallible, cache_result, CachedFn};
pub use connection_pool::{
    ConnectionFactory, ConnectionGuard, ConnectionPool, PoolCounters, PoolStats, PooledConnection,
};
pub use error::{AppResult, ResourceError, TaskError};
pub use manager::{get, initialize, is_initialized, shutdown, ManagerStats, ResourceManager};
pub use memory_cache::{CacheCounters, CacheItem, CacheStats, MemoryCache};
pub use task_queue::{AsyncTaskQueue, QueueStats, TaskHandle};
