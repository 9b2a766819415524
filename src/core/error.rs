//! Error types for pool, queue and manager operations.

use thiserror::Error;

/// Errors produced by the resource components.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No connection became available within the requested timeout.
    #[error("connection pool exhausted after waiting {waited_ms} ms")]
    Exhausted {
        /// How long the caller waited before giving up.
        waited_ms: u128,
    },
    /// The connection pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,
    /// The task queue is not running.
    #[error("task queue is not running")]
    QueueStopped,
    /// The process-wide manager was read before `initialize` was called.
    #[error("resource manager not initialized; call initialize() first")]
    NotInitialized,
    /// The installed manager was built for a different connection factory type.
    #[error("resource manager was initialized with a different factory type")]
    ManagerTypeMismatch,
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure of a single submitted task, delivered only through that task's handle.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The callable returned an error.
    #[error("task failed: {0}")]
    Failed(anyhow::Error),
    /// The callable panicked; the worker that ran it keeps going.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was dropped before it produced a result.
    #[error("task abandoned before completion")]
    Abandoned,
}

impl TaskError {
    /// Build a `Panicked` error from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
