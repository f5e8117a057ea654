// ============================================================
// Layer 3 — Task Mode
// ============================================================
// A run either predicts pose quality only, or pose quality
// together with binding affinity. The choice is made once, from
// whether an affinity column was configured, and never changes
// for the rest of the run.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskMode {
    /// One output: pose log-probabilities
    PoseOnly,

    /// Two outputs: pose log-probabilities and predicted affinity
    PoseAndAffinity,
}

impl TaskMode {
    /// Resolve the task from the configured affinity column.
    pub fn from_affinity_column(affinity_pos: Option<usize>) -> Self {
        match affinity_pos {
            Some(_) => TaskMode::PoseAndAffinity,
            None    => TaskMode::PoseOnly,
        }
    }

    pub fn has_affinity(self) -> bool {
        matches!(self, TaskMode::PoseAndAffinity)
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskMode::PoseOnly        => write!(f, "pose"),
            TaskMode::PoseAndAffinity => write!(f, "pose+affinity"),
        }
    }
}
