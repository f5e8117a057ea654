// ============================================================
// Layer 5 — Training Controllers
// ============================================================
// Handlers attached to the trainer engine. Each one owns the
// resources it needs and reacts to a few events:
//
//   SchedulerController   EpochCompleted(every M), Completed
//     evaluate train (and test) sets, log, append history,
//     drive reduce-on-plateau, write the CSVs at the end
//
//   CheckpointController  EpochCompleted(every K)
//     snapshot model + optimizer, keep the most recent few
//
//   ProgressReporter      EpochStarted, IterationCompleted, EpochCompleted
//     indicatif bar over the iterations of one epoch

use std::path::PathBuf;

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::loader::GridLoader;
use crate::domain::error::TrainingError;
use crate::engine::{EngineState, Event, Handler};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsTable, run_log::RunLog};
use crate::ml::{evaluator::Evaluator, plateau::LrPlateau, step::TrainStrategy};

pub const POSE_LOSS: &str = "Loss (pose)";
pub const AFFINITY_LOSS: &str = "Loss (affinity)";

// ─── Scheduler ────────────────────────────────────────────────────────────────
pub struct SchedulerController<B: AutodiffBackend> {
    evaluator:  Evaluator<B::InnerBackend>,
    train_data: GridLoader<B::InnerBackend>,
    test_data:  Option<GridLoader<B::InnerBackend>>,
    plateau:    Option<LrPlateau>,
    train_hist: MetricsTable,
    test_hist:  MetricsTable,
    log:        RunLog,
    out_dir:    PathBuf,
}

impl<B: AutodiffBackend> SchedulerController<B> {
    pub fn new(
        evaluator:  Evaluator<B::InnerBackend>,
        train_data: GridLoader<B::InnerBackend>,
        test_data:  Option<GridLoader<B::InnerBackend>>,
        plateau:    Option<LrPlateau>,
        log:        RunLog,
        out_dir:    impl Into<PathBuf>,
    ) -> Self {
        Self {
            evaluator,
            train_data,
            test_data,
            plateau,
            train_hist: MetricsTable::new(),
            test_hist:  MetricsTable::new(),
            log,
            out_dir:    out_dir.into(),
        }
    }

    fn evaluate(&mut self, state: &EngineState<f64>, strategy: &mut TrainStrategy<B>) -> Result<()> {
        let epoch = state.epoch;

        let train = self.evaluator.run(strategy.valid_model(), &self.train_data)?;
        self.log.results(
            "Train Results",
            epoch,
            Some((state.epoch_time, state.elapsed())),
            &train,
        )?;
        self.train_hist.append(epoch, &train)?;

        if let Some(test_data) = &self.test_data {
            let test = self.evaluator.run(strategy.valid_model(), test_data)?;
            self.log.results("Test Results", epoch, None, &test)?;
            self.test_hist.append(epoch, &test)?;
        }

        if let Some(plateau) = &mut self.plateau {
            let pose = train
                .get(POSE_LOSS)
                .ok_or_else(|| TrainingError::MissingMetric(POSE_LOSS.to_string()))?;
            let monitored = pose + train.get(AFFINITY_LOSS).unwrap_or(0.0);

            let lr = plateau.step(monitored, strategy);
            tracing::debug!("Plateau check at epoch {epoch}: monitored {monitored:.5}, lr {lr}");
            self.log.line(&format!("    Learning rate: {lr}"))?;
        }
        Ok(())
    }

    fn write_histories(&self) -> Result<()> {
        self.train_hist.write_csv(&self.out_dir.join("metrics_train.csv"))?;
        if self.test_data.is_some() {
            self.test_hist.write_csv(&self.out_dir.join("metrics_test.csv"))?;
        }
        Ok(())
    }
}

impl<B: AutodiffBackend> Handler<TrainStrategy<B>> for SchedulerController<B> {
    fn handle(&mut self, event: Event, state: &mut EngineState<f64>, strategy: &mut TrainStrategy<B>) -> Result<()> {
        match event {
            Event::EpochCompleted => self.evaluate(state, strategy),
            Event::Completed      => self.write_histories(),
            _                     => Ok(()),
        }
    }
}

// ─── Checkpoints ──────────────────────────────────────────────────────────────
pub struct CheckpointController {
    manager: CheckpointManager,
}

impl CheckpointController {
    pub fn new(manager: CheckpointManager) -> Self {
        Self { manager }
    }
}

impl<B: AutodiffBackend> Handler<TrainStrategy<B>> for CheckpointController {
    fn handle(&mut self, _event: Event, state: &mut EngineState<f64>, strategy: &mut TrainStrategy<B>) -> Result<()> {
        self.manager.save(state.epoch, &*strategy)?;
        Ok(())
    }
}

// ─── Progress ─────────────────────────────────────────────────────────────────
pub struct ProgressReporter {
    batches: usize,
    bar:     Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new(batches: usize) -> Self {
        Self { batches, bar: None }
    }
}

impl<B: AutodiffBackend> Handler<TrainStrategy<B>> for ProgressReporter {
    fn handle(&mut self, event: Event, state: &mut EngineState<f64>, _strategy: &mut TrainStrategy<B>) -> Result<()> {
        match event {
            Event::EpochStarted => {
                let bar = ProgressBar::new(self.batches as u64);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} {bar:40.cyan/blue} {pos}/{len} ({eta})")?
                        .progress_chars("##-"),
                );
                bar.set_message(format!("Epoch [{}/{}]", state.epoch, state.max_epochs));
                self.bar = Some(bar);
            }
            Event::IterationCompleted => {
                if let Some(bar) = &self.bar {
                    if let Some(loss) = state.output {
                        bar.set_message(format!(
                            "Epoch [{}/{}] loss {:.4}",
                            state.epoch, state.max_epochs, loss
                        ));
                    }
                    bar.inc(1);
                }
            }
            Event::EpochCompleted => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
            }
            _ => {}
        }
        Ok(())
    }
}
