// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn-specific training and evaluation code lives here,
// driven by the generic engine in `crate::engine`.
//
//   model.rs       — 3D convolutional pose / pose+affinity nets
//   loss.rs        — pose NLL and hinge-aware affinity loss
//   optim.rs       — SGD with momentum, weight decay, clipping
//   step.rs        — per-batch train and eval strategies
//   metrics.rs     — accumulating metrics and their registry
//   plateau.rs     — reduce-on-plateau learning rate control
//   evaluator.rs   — one evaluation pass per call
//   controllers.rs — trainer handlers (scheduler, checkpoints, progress)
//   trainer.rs     — wires a full training run together
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// 3D CNN architectures
pub mod model;

/// Training losses
pub mod loss;

/// Optimizer settings and parameter groups
pub mod optim;

/// Train / eval step strategies
pub mod step;

/// Evaluation metrics
pub mod metrics;

/// Reduce-on-plateau learning rate
pub mod plateau;

/// Evaluation engine wrapper
pub mod evaluator;

/// Handlers attached to the trainer engine
pub mod controllers;

/// Full training run
pub mod trainer;

/// Where tensors live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// NdArray backend
    #[default]
    Cpu,
    /// Wgpu backend
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Gpu => f.write_str("gpu"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(DeviceKind::Cpu),
            "gpu" => Ok(DeviceKind::Gpu),
            other => Err(format!("unknown device '{other}' (expected cpu or gpu)")),
        }
    }
}
