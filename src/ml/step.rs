// ============================================================
// Layer 5 — Step Strategies
// ============================================================
// The per-batch work the engines delegate to. The task mode is
// fixed at startup, so each strategy is a two-variant sum type
// carrying exactly the model and losses its variant needs.
//
//   TrainStrategy  (autodiff backend, one optimizer update per batch)
//     PoseOnly         loss = pose
//     PoseAndAffinity  loss = pose + affinity
//
//   EvalStrategy   (inner backend, no gradients)
//     PoseOnly         → { pose_log, labels }
//     PoseAndAffinity  → { pose_log, labels, affinities_pred, affinities }
//
// Evaluation models come from `AutodiffModule::valid()`, a copy
// on the inner backend, so evaluation can never touch the
// parameters being trained.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, Recorder, RecorderError},
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::GridBatch;
use crate::domain::{
    error::{CheckpointError, TrainingError},
    task::TaskMode,
};
use crate::engine::{EngineState, Step};
use crate::infra::checkpoint::Checkpointable;
use crate::ml::{
    loss::{AffinityLoss, PoseLoss},
    model::{GridModelConfig, PoseAffinityNet, PoseNet},
    optim::{Learner, ParamGroups, SgdSettings},
};

// ─── Training ─────────────────────────────────────────────────────────────────
pub enum TrainStrategy<B: AutodiffBackend> {
    PoseOnly {
        learner:   Learner<PoseNet<B>, B>,
        pose_loss: PoseLoss,
    },
    PoseAndAffinity {
        learner:       Learner<PoseAffinityNet<B>, B>,
        pose_loss:     PoseLoss,
        affinity_loss: AffinityLoss,
    },
}

impl<B: AutodiffBackend> TrainStrategy<B> {
    /// Build the model and optimizer for `task`. `affinity_loss` is
    /// only used by the dual-task variant.
    pub fn new(
        task:          TaskMode,
        model_cfg:     &GridModelConfig,
        sgd:           &SgdSettings,
        affinity_loss: AffinityLoss,
        device:        &B::Device,
    ) -> Self {
        match task {
            TaskMode::PoseOnly => TrainStrategy::PoseOnly {
                learner:   Learner::new(model_cfg.init_pose(device), sgd),
                pose_loss: PoseLoss,
            },
            TaskMode::PoseAndAffinity => TrainStrategy::PoseAndAffinity {
                learner:   Learner::new(model_cfg.init_pose_affinity(device), sgd),
                pose_loss: PoseLoss,
                affinity_loss,
            },
        }
    }

    pub fn task(&self) -> TaskMode {
        match self {
            TrainStrategy::PoseOnly { .. }        => TaskMode::PoseOnly,
            TrainStrategy::PoseAndAffinity { .. } => TaskMode::PoseAndAffinity,
        }
    }

    /// Inference-mode copy of the current model.
    pub fn valid_model(&self) -> EvalModel<B::InnerBackend> {
        match self {
            TrainStrategy::PoseOnly { learner, .. } => EvalModel::PoseOnly(learner.model.valid()),
            TrainStrategy::PoseAndAffinity { learner, .. } => {
                EvalModel::PoseAndAffinity(learner.model.valid())
            }
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            TrainStrategy::PoseOnly { learner, .. }        => learner.model.num_params(),
            TrainStrategy::PoseAndAffinity { learner, .. } => learner.model.num_params(),
        }
    }

    fn groups(&self) -> &dyn ParamGroups {
        match self {
            TrainStrategy::PoseOnly { learner, .. }        => learner,
            TrainStrategy::PoseAndAffinity { learner, .. } => learner,
        }
    }

    fn groups_mut(&mut self) -> &mut dyn ParamGroups {
        match self {
            TrainStrategy::PoseOnly { learner, .. }        => learner,
            TrainStrategy::PoseAndAffinity { learner, .. } => learner,
        }
    }
}

impl<B: AutodiffBackend> Step for TrainStrategy<B> {
    type Batch  = GridBatch<B>;
    type Output = f64;

    fn step(&mut self, state: &EngineState<f64>, batch: GridBatch<B>) -> Result<f64> {
        match self {
            TrainStrategy::PoseOnly { learner, pose_loss } => {
                let pose_log = learner.model.forward(batch.grids);
                let loss = pose_loss.forward(pose_log, batch.labels);
                learner.update(loss, state.epoch, state.iteration)
            }
            TrainStrategy::PoseAndAffinity { learner, pose_loss, affinity_loss } => {
                let affinities = batch.affinities.ok_or(TrainingError::MissingAffinities)?;
                let (pose_log, affinities_pred) = learner.model.forward(batch.grids);
                let loss = pose_loss.forward(pose_log, batch.labels)
                    + affinity_loss.forward(affinities_pred, affinities);
                learner.update(loss, state.epoch, state.iteration)
            }
        }
    }
}

impl<B: AutodiffBackend> ParamGroups for TrainStrategy<B> {
    fn learning_rates(&self) -> Vec<f64> {
        self.groups().learning_rates()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.groups_mut().set_learning_rate(lr);
    }
}

impl<B: AutodiffBackend> Checkpointable for TrainStrategy<B> {
    fn write_checkpoint(&self, dir: &Path) -> Result<()> {
        let recorder = CompactRecorder::new();
        let model_path = dir.join("model");
        let optim_path = dir.join("optimizer");

        match self {
            TrainStrategy::PoseOnly { learner, .. } => {
                recorder
                    .record(learner.model.clone().into_record(), model_path.clone())
                    .map_err(recorder_error(&model_path))?;
                recorder
                    .record(learner.optimizer().to_record(), optim_path.clone())
                    .map_err(recorder_error(&optim_path))?;
            }
            TrainStrategy::PoseAndAffinity { learner, .. } => {
                recorder
                    .record(learner.model.clone().into_record(), model_path.clone())
                    .map_err(recorder_error(&model_path))?;
                recorder
                    .record(learner.optimizer().to_record(), optim_path.clone())
                    .map_err(recorder_error(&optim_path))?;
            }
        }

        tracing::debug!("Recorded '{}' and '{}'", model_path.display(), optim_path.display());
        Ok(())
    }
}

fn recorder_error(path: &Path) -> impl FnOnce(RecorderError) -> CheckpointError + '_ {
    move |e| CheckpointError::Recorder { path: path.to_path_buf(), message: e.to_string() }
}

// ─── Evaluation ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub enum EvalModel<B: Backend> {
    PoseOnly(PoseNet<B>),
    PoseAndAffinity(PoseAffinityNet<B>),
}

impl<B: Backend> EvalModel<B> {
    /// Rebuild a model for `task` and restore its weights from a
    /// recorded checkpoint.
    pub fn load(task: TaskMode, model_cfg: &GridModelConfig, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = CompactRecorder::new();
        let context = || format!("Cannot load model weights from '{}'", path.display());

        Ok(match task {
            TaskMode::PoseOnly => {
                let record = recorder.load(path.to_path_buf(), device).with_context(context)?;
                EvalModel::PoseOnly(model_cfg.init_pose(device).load_record(record))
            }
            TaskMode::PoseAndAffinity => {
                let record = recorder.load(path.to_path_buf(), device).with_context(context)?;
                EvalModel::PoseAndAffinity(model_cfg.init_pose_affinity(device).load_record(record))
            }
        })
    }
}

/// Affinity fields of a dual-task evaluation record.
#[derive(Debug, Clone)]
pub struct AffinityOutput<B: Backend> {
    /// Predicted affinities — shape: [batch]
    pub affinities_pred: Tensor<B, 1>,
    /// Target affinities — shape: [batch]
    pub affinities: Tensor<B, 1>,
}

/// Normalised evaluation record. Pose fields are always present.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// Pose log-probabilities — shape: [batch, 2]
    pub pose_log: Tensor<B, 2>,
    /// True pose classes — shape: [batch]
    pub labels: Tensor<B, 1, Int>,
    pub affinity: Option<AffinityOutput<B>>,
}

impl<B: Backend> StepOutput<B> {
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec!["pose_log", "labels"];
        if self.affinity.is_some() {
            names.extend(["affinities_pred", "affinities"]);
        }
        names
    }

    pub fn affinity_fields(&self) -> Result<&AffinityOutput<B>, TrainingError> {
        self.affinity
            .as_ref()
            .ok_or(TrainingError::MissingField("affinities_pred"))
    }
}

pub struct EvalStrategy<B: Backend> {
    pub model: EvalModel<B>,
}

impl<B: Backend> Step for EvalStrategy<B> {
    type Batch  = GridBatch<B>;
    type Output = StepOutput<B>;

    fn step(&mut self, _state: &EngineState<StepOutput<B>>, batch: GridBatch<B>) -> Result<StepOutput<B>> {
        match &self.model {
            EvalModel::PoseOnly(model) => Ok(StepOutput {
                pose_log: model.forward(batch.grids),
                labels:   batch.labels,
                affinity: None,
            }),
            EvalModel::PoseAndAffinity(model) => {
                let affinities = batch.affinities.ok_or(TrainingError::MissingAffinities)?;
                let (pose_log, affinities_pred) = model.forward(batch.grids);
                Ok(StepOutput {
                    pose_log,
                    labels: batch.labels,
                    affinity: Some(AffinityOutput { affinities_pred, affinities }),
                })
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::grid::GridDims;
    use crate::ml::{loss::AffinityLossConfig, model::Architecture};
    use burn::backend::{Autodiff, NdArray};

    pub(crate) type TestBackend = Autodiff<NdArray>;

    pub(crate) fn sgd(lr: f64) -> SgdSettings {
        SgdSettings { base_lr: lr, momentum: 0.9, weight_decay: 0.0, clip_gradients: 10.0 }
    }

    pub(crate) fn model_cfg() -> GridModelConfig {
        GridModelConfig::new(Architecture::Default2017, GridDims::new(2, 8))
    }

    /// Fixed batch of four examples whose class is readable from the grid mean.
    pub(crate) fn batch<B: Backend>(with_affinity: bool, device: &B::Device) -> GridBatch<B> {
        let dims = GridDims::new(2, 8);
        let labels = [1, 0, 1, 0];
        let values: Vec<f32> = labels
            .iter()
            .flat_map(|&l| std::iter::repeat(if l == 1 { 0.8 } else { 0.1 }).take(dims.values()))
            .collect();

        GridBatch {
            grids: Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([4, 2, 8, 8, 8]),
            labels: Tensor::from_ints(labels, device),
            affinities: with_affinity.then(|| Tensor::from_floats([6.0, -4.0, 5.0, -7.0], device)),
        }
    }

    fn strategy(task: TaskMode, lr: f64) -> TrainStrategy<TestBackend> {
        TrainStrategy::new(task, &model_cfg(), &sgd(lr), AffinityLossConfig::new().init(), &Default::default())
    }

    fn state(epoch: usize, iteration: usize) -> EngineState<f64> {
        EngineState { epoch, iteration, ..Default::default() }
    }

    #[test]
    fn test_step_keeps_parameter_count_and_shapes() {
        for task in [TaskMode::PoseOnly, TaskMode::PoseAndAffinity] {
            let mut s = strategy(task, 0.01);
            let before = s.num_params();
            let loss = s.step(&state(1, 1), batch(task.has_affinity(), &Default::default())).unwrap();

            assert!(loss.is_finite());
            assert_eq!(s.num_params(), before);
            assert_eq!(s.task(), task);
        }
    }

    #[test]
    fn test_loss_decreases_on_overfittable_batch() {
        for task in [TaskMode::PoseOnly, TaskMode::PoseAndAffinity] {
            let mut s = strategy(task, 0.001);
            let device = Default::default();
            let first = s.step(&state(1, 1), batch(task.has_affinity(), &device)).unwrap();
            let mut last = first;
            for i in 2..=20 {
                last = s.step(&state(1, i), batch(task.has_affinity(), &device)).unwrap();
            }
            assert!(last < first, "{task}: loss went from {first} to {last}");
        }
    }

    #[test]
    fn test_dual_task_loss_is_plain_sum() {
        let mut s = strategy(TaskMode::PoseAndAffinity, 0.01);
        let device = Default::default();
        let b = batch::<TestBackend>(true, &device);

        let (pose, affinity) = match &s {
            TrainStrategy::PoseAndAffinity { learner, pose_loss, affinity_loss } => {
                let (pose_log, pred) = learner.model.forward(b.grids.clone());
                let pose = pose_loss.forward(pose_log, b.labels.clone()).into_scalar().elem::<f64>();
                let aff = affinity_loss
                    .forward(pred, b.affinities.clone().unwrap())
                    .into_scalar()
                    .elem::<f64>();
                (pose, aff)
            }
            TrainStrategy::PoseOnly { .. } => unreachable!(),
        };

        let total = s.step(&state(1, 1), b).unwrap();
        assert!(affinity > 0.0);
        assert!((total - (pose + affinity)).abs() < 1e-5 * total.abs().max(1.0));
    }

    #[test]
    fn test_non_finite_loss_is_fatal() {
        let mut s = strategy(TaskMode::PoseOnly, 0.01);
        let device = Default::default();
        let mut b = batch::<TestBackend>(false, &device);
        b.grids = b.grids.mul_scalar(f32::NAN);

        let err = s.step(&state(2, 7), b).unwrap_err();
        match err.downcast_ref::<TrainingError>() {
            Some(TrainingError::NonFiniteLoss { epoch, iteration, .. }) => {
                assert_eq!((*epoch, *iteration), (2, 7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_dual_task_requires_affinities() {
        let mut s = strategy(TaskMode::PoseAndAffinity, 0.01);
        let err = s.step(&state(1, 1), batch(false, &Default::default())).unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainingError>(), Some(TrainingError::MissingAffinities)));
    }

    #[test]
    fn test_single_param_group_learning_rate() {
        let mut s = strategy(TaskMode::PoseOnly, 0.01);
        assert_eq!(s.learning_rates(), vec![0.01]);
        s.set_learning_rate(0.001);
        assert_eq!(s.learning_rates(), vec![0.001]);
    }

    #[test]
    fn test_eval_records_have_task_fields() {
        let device = Default::default();
        let pose = strategy(TaskMode::PoseOnly, 0.01);
        let dual = strategy(TaskMode::PoseAndAffinity, 0.01);

        let mut eval = EvalStrategy { model: pose.valid_model() };
        let out = eval.step(&EngineState::default(), batch::<NdArray>(false, &device)).unwrap();
        assert_eq!(out.field_names(), vec!["pose_log", "labels"]);
        assert_eq!(out.pose_log.dims(), [4, 2]);

        let mut eval = EvalStrategy { model: dual.valid_model() };
        let out = eval.step(&EngineState::default(), batch::<NdArray>(true, &device)).unwrap();
        assert_eq!(out.field_names(), vec!["pose_log", "labels", "affinities_pred", "affinities"]);
        assert_eq!(out.affinity_fields().unwrap().affinities_pred.dims(), [4]);
    }

    #[test]
    fn test_checkpoint_round_trip_restores_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let s = strategy(TaskMode::PoseAndAffinity, 0.01);
        s.write_checkpoint(dir.path()).unwrap();

        let restored =
            EvalModel::<NdArray>::load(TaskMode::PoseAndAffinity, &model_cfg(), &dir.path().join("model"), &device)
                .unwrap();

        let b = batch::<NdArray>(true, &device);
        let expected = match s.valid_model() {
            EvalModel::PoseAndAffinity(m) => m.forward(b.grids.clone()).1,
            EvalModel::PoseOnly(_) => unreachable!(),
        };
        let actual = match restored {
            EvalModel::PoseAndAffinity(m) => m.forward(b.grids).1,
            EvalModel::PoseOnly(_) => unreachable!(),
        };

        // Records are stored at half precision
        let diff: f32 = (expected - actual).abs().max().into_scalar();
        assert!(diff < 0.1, "prediction drifted by {diff}");
    }

    #[test]
    fn test_unwritable_checkpoint_names_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = strategy(TaskMode::PoseOnly, 0.01).write_checkpoint(&blocker).unwrap_err();
        match err.downcast_ref::<CheckpointError>() {
            Some(CheckpointError::Recorder { path, .. }) => assert_eq!(path, &blocker.join("model")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
