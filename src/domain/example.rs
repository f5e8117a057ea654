// ============================================================
// Layer 3 — Pose Example Domain Type
// ============================================================
// One labelled training example: a gridded pose, its pose
// label, and (in dual-task runs) its experimental affinity.
//
// Affinity sign convention:
//   affinity > 0  → good pose, the value is the measured affinity
//   affinity < 0  → bad pose, |affinity| is an upper bound only
//   affinity = 0  → no affinity information

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseExample {
    /// Flattened grid values, channel-major `[C, N, N, N]`
    pub grid: Vec<f32>,

    /// Pose class: 1 = good pose, 0 = bad pose
    pub label: i32,

    /// Experimental affinity, present only in dual-task runs
    pub affinity: Option<f32>,
}

impl PoseExample {
    pub fn new(grid: Vec<f32>, label: i32, affinity: Option<f32>) -> Self {
        Self { grid, label, affinity }
    }
}
