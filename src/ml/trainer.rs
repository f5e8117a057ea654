// ============================================================
// Layer 5 — Training Run
// ============================================================
// Wires one training run together and drives it:
//
//   TrainStrategy ──► Engine("trainer")
//                       ├─ SchedulerController   EpochCompleted(every test_every), Completed
//                       ├─ CheckpointController  EpochCompleted(every checkpoint_every)
//                       └─ ProgressReporter      (optional)
//
// Training runs on the autodiff backend B. Evaluation runs on
// B::InnerBackend with a model copy from `valid()`, so the
// evaluation loaders must be built on the inner backend too:
//
//   train       GridLoader<B>               shuffled
//   train_eval  GridLoader<B::InnerBackend> file order
//   test        GridLoader<B::InnerBackend> file order, optional

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;

use crate::data::loader::GridLoader;
use crate::domain::{error::ConfigError, task::TaskMode};
use crate::engine::{Engine, Event};
use crate::infra::{checkpoint::CheckpointManager, run_log::RunLog};
use crate::ml::{
    controllers::{CheckpointController, ProgressReporter, SchedulerController},
    evaluator::Evaluator,
    loss::AffinityLoss,
    metrics::MetricRegistry,
    model::GridModelConfig,
    optim::SgdSettings,
    plateau::{LrPlateau, PlateauConfig},
    step::TrainStrategy,
};

/// Everything a run needs besides its data and output sinks.
#[derive(Debug, Clone)]
pub struct TrainingPlan {
    pub task:             TaskMode,
    pub model:            GridModelConfig,
    pub sgd:              SgdSettings,
    pub affinity_loss:    AffinityLoss,
    /// `None` keeps the learning rate fixed
    pub plateau:          Option<PlateauConfig>,
    pub roc_auc:          bool,
    pub epochs:           usize,
    pub test_every:       usize,
    pub checkpoint_every: usize,
    pub progress_bar:     bool,
}

pub struct TrainingData<B: AutodiffBackend> {
    pub train:      GridLoader<B>,
    pub train_eval: GridLoader<B::InnerBackend>,
    pub test:       Option<GridLoader<B::InnerBackend>>,
}

impl<B: AutodiffBackend> TrainingData<B> {
    /// Train and test grids must share one shape.
    pub fn check_dims(&self) -> Result<(), ConfigError> {
        let train = self.train.dims();
        match &self.test {
            Some(test) if test.dims() != train => {
                Err(ConfigError::DimensionMismatch { train, test: test.dims() })
            }
            _ => Ok(()),
        }
    }
}

/// Train for `plan.epochs` epochs, returning the final strategy.
pub fn run_training<B: AutodiffBackend>(
    plan:        &TrainingPlan,
    data:        TrainingData<B>,
    checkpoints: CheckpointManager,
    log:         RunLog,
    device:      &B::Device,
) -> Result<TrainStrategy<B>> {
    data.check_dims()?;
    plan.model.check()?;
    if plan.model.dims != data.train.dims() {
        return Err(ConfigError::invalid(
            "dims",
            format!("model expects {} grids, data has {}", plan.model.dims, data.train.dims()),
        )
        .into());
    }

    let strategy = TrainStrategy::<B>::new(
        plan.task,
        &plan.model,
        &plan.sgd,
        plan.affinity_loss.clone(),
        device,
    );
    tracing::info!(
        "Model ready: {} ({}), {} parameters",
        plan.model.architecture,
        strategy.task(),
        strategy.num_params()
    );

    let plateau = plan
        .plateau
        .map(|cfg| LrPlateau::attach(cfg, &strategy))
        .transpose()?;

    let registry  = MetricRegistry::for_task(plan.task, plan.roc_auc, plan.affinity_loss.clone());
    let evaluator = Evaluator::new(strategy.valid_model(), registry);
    let out_dir   = checkpoints.dir().to_path_buf();
    let batches   = data.train.num_batches();

    let scheduler = SchedulerController::<B>::new(
        evaluator,
        data.train_eval,
        data.test,
        plateau,
        log,
        out_dir,
    );

    let mut engine = Engine::new("trainer", strategy);
    engine.on(
        [Event::EpochCompleted.every(plan.test_every), Event::Completed.into()],
        scheduler,
    );
    engine.on(
        [Event::EpochCompleted.every(plan.checkpoint_every)],
        CheckpointController::new(checkpoints),
    );
    if plan.progress_bar {
        engine.on(
            [Event::EpochStarted, Event::IterationCompleted, Event::EpochCompleted],
            ProgressReporter::new(batches),
        );
    }

    tracing::info!("Training for {} epochs of {} batches", plan.epochs, batches);
    engine.run(&data.train, plan.epochs)?;
    tracing::info!("Training complete");

    Ok(engine.into_step())
}
