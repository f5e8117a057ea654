// ============================================================
// Layer 3 — Typed Errors
// ============================================================
// Every fatal precondition of a run has a named error so the
// operator sees exactly which check failed. Application code
// wraps these in anyhow with extra context; tests downcast to
// them.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::grid::GridDims;

/// Invalid or inconsistent run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("train and test grids differ: train is {train}, test is {test}")]
    DimensionMismatch { train: GridDims, test: GridDims },

    /// Adaptive learning rate drives exactly one parameter group.
    #[error("adaptive learning rate needs exactly one optimizer parameter group, found {found}")]
    ParamGroups { found: usize },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}

/// Failures raised while training or evaluating.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("non-finite loss {value} at epoch {epoch}, iteration {iteration}")]
    NonFiniteLoss { value: f64, epoch: usize, iteration: usize },

    #[error("non-finite gradient norm {norm} at epoch {epoch}, iteration {iteration}")]
    NonFiniteGradient { norm: f64, epoch: usize, iteration: usize },

    #[error("batch carries no affinity targets but the run predicts affinity")]
    MissingAffinities,

    #[error("step output has no `{0}` field")]
    MissingField(&'static str),

    #[error("metric `{0}` was computed before any example was seen")]
    EmptyMetric(&'static str),

    #[error("ROC AUC is undefined when only one pose class is present (use --no-roc-auc)")]
    SingleClass,

    #[error("metric `{0}` is missing from the evaluation results")]
    MissingMetric(String),

    #[error("cannot read tensor data: {0}")]
    TensorData(String),

    #[error("history columns changed: expected {expected:?}, found {found:?}")]
    HistoryColumns { expected: Vec<String>, found: Vec<String> },

    #[error("history rows must have increasing epochs: {epoch} after {last}")]
    HistoryOrder { last: usize, epoch: usize },
}

/// Checkpoint persistence failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("output directory '{dir}' already contains checkpoints ({found:?}); use a fresh directory")]
    Existing { dir: PathBuf, found: Vec<String> },

    #[error("no checkpoint found in '{0}'")]
    NotFound(PathBuf),

    #[error("cannot record '{path}': {message}")]
    Recorder { path: PathBuf, message: String },
}
