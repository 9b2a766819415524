//! Configuration models for the pool, queue and cache.

pub mod manager;

pub use manager::{ConnectionPoolConfig, ManagerConfig, MemoryCacheConfig, TaskQueueConfig};
