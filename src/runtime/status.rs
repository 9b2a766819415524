//! Status surface for admin tooling: health probe and JSON stats report.

use serde::{Deserialize, Serialize};

use crate::core::{ConnectionFactory, ManagerStats, ResourceManager};

/// Health response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Pool open and queue accepting work.
    pub ok: bool,
    /// Whether the pool accepts `acquire` calls.
    pub pool_open: bool,
    /// Whether the task queue accepts submissions.
    pub queue_running: bool,
}

/// Health plus a full stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Health summary.
    pub health: Health,
    /// Component snapshot.
    pub stats: ManagerStats,
}

impl StatusReport {
    /// Pretty-printed JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if rendering fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Probe a manager's health.
pub fn health<F: ConnectionFactory>(manager: &ResourceManager<F>) -> Health {
    let pool_open = manager.pool().is_open();
    let queue_running = manager.queue().is_running();
    Health {
        ok: pool_open && queue_running,
        pool_open,
        queue_running,
    }
}

/// Build the full status report for a manager.
pub fn status_report<F: ConnectionFactory>(manager: &ResourceManager<F>) -> StatusReport {
    StatusReport {
        health: health(manager),
        stats: manager.get_all_stats(),
    }
}
