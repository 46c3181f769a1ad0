//! Serializable identifiers and scheduling enums shared across modules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier assigned to every submitted task.
pub type TaskId = u64;

/// Identifier of a worker thread inside a pool. Never reused after a resize.
pub type WorkerId = usize;

/// Scheduling priority. Higher variants are drained first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority for plain submissions.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Always drained before every other priority.
    Critical,
}

impl Priority {
    /// Numeric rank used by the queue comparator.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}
