//! # Resource Manager
//!
//! Shared in-process resource layer for a service: a bounded connection pool, a
//! priority task queue and a TTL/LRU memory cache, started and stopped together.
//!
//! ## Components
//!
//! - **`ConnectionPool`**: `pool_size` eagerly created connections plus up to
//!   `max_overflow` on demand; acquire with timeout, liveness probe on release
//! - **`AsyncTaskQueue`**: priority + FIFO ordering, async workers, blocking callables
//!   offloaded to a dedicated `BlockingPool`, results through awaitable `TaskHandle`s
//! - **`MemoryCache`**: per-entry TTL, LRU eviction at capacity, background expiry sweep
//! - **`cache_result`**: memoizing wrapper backed by a private cache
//! - **`ResourceManager`**: owns all three; `initialize` / `get` / `shutdown` manage a
//!   process-wide instance
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use resource_manager::config::ManagerConfig;
//! use resource_manager::infra::SqliteConnectionFactory;
//! use resource_manager::util::{init_tracing, Priority};
//!
//! init_tracing();
//! let manager = resource_manager::initialize(
//!     SqliteConnectionFactory::new("app.db"),
//!     ManagerConfig::from_env()?,
//! )
//! .await?;
//!
//! let rows = manager
//!     .submit_with_connection(Priority::NORMAL, |conn| {
//!         Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get::<_, i64>(0))?)
//!     })
//!     .await?
//!     .await?;
//!
//! manager.cache().set("users".into(), rows.into(), None);
//! println!("{}", resource_manager::runtime::status_report(&manager).to_json()?);
//! resource_manager::shutdown().await;
//! ```
//!
//! ## Feature flags
//!
//! - `sqlite`: `infra::SqliteConnectionFactory` backed by `rusqlite`

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connection pool, task queue, cache and the manager facade.
pub mod core;
/// Configuration models for the pool, queue and cache.
pub mod config;
/// Builders to construct the manager from configuration.
pub mod builders;
/// Infrastructure adapters for queue storage and connection backends.
pub mod infra;
/// Status and health surface.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::core::{get, initialize, is_initialized, shutdown};
