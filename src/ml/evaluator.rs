// ============================================================
// Layer 5 — Evaluator
// ============================================================
// One inference pass over a dataset per call. The metric
// registry is attached to the evaluation engine once; each run
// swaps in the model to evaluate, resets the accumulators and
// returns the fresh metrics mapping.

use anyhow::Result;
use burn::prelude::*;

use crate::data::batcher::GridBatch;
use crate::engine::{DataSource, Engine, Event, Metrics};
use crate::ml::{
    metrics::MetricRegistry,
    step::{EvalModel, EvalStrategy},
};

pub struct Evaluator<B: Backend> {
    engine: Engine<EvalStrategy<B>>,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(model: EvalModel<B>, registry: MetricRegistry<B>) -> Self {
        let mut engine = Engine::new("evaluator", EvalStrategy { model });
        engine.on(
            [Event::Started, Event::IterationCompleted, Event::Completed],
            registry,
        );
        Self { engine }
    }

    /// Evaluate `model` on every batch of `data`.
    pub fn run(&mut self, model: EvalModel<B>, data: &impl DataSource<GridBatch<B>>) -> Result<Metrics> {
        self.engine.step_mut().model = model;
        self.engine.run(data, 1)?;
        Ok(self.engine.state().metrics.clone())
    }
}
