//! Small serializable value types shared across components.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier assigned by the task queue.
pub type TaskId = u64;

/// Scheduling priority. Numerically lower values are dequeued first.
///
/// The range is `0..=255`. Use [`Priority::saturating`] to map a wider signed
/// priority scale onto it; out-of-range values clamp to the nearest bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Most urgent priority.
    pub const HIGHEST: Self = Self(0);
    /// Priority used when the caller does not pick one.
    pub const NORMAL: Self = Self(5);
    /// Least urgent priority.
    pub const LOWEST: Self = Self(u8::MAX);

    /// Priority from a signed value, clamped into `0..=255`.
    #[must_use]
    pub fn saturating(value: i64) -> Self {
        Self(u8::try_from(value.clamp(0, i64::from(u8::MAX))).unwrap_or(u8::MAX))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
