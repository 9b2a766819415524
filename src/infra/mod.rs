//! Infrastructure adapters: queue storage and connection backends.

pub mod queue;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use queue::PriorityQueue;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnectionFactory;
