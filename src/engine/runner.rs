// ============================================================
// Layer 5 — Engine
// ============================================================
// An event-driven loop over a restartable data source:
//
//   fire(Started)
//   for epoch in 1..=max_epochs:
//       fire(EpochStarted)
//       for batch in data:          (a failed load ends the run)
//           output = step(batch)
//           fire(IterationCompleted)
//       fire(EpochCompleted)
//   fire(Completed)
//
// The per-batch work is a `Step` (training update or evaluation
// forward pass). Everything else is a `Handler` registered
// against events. Handlers for one event run synchronously in
// registration order. The first error from a step or a handler
// stops the run and is returned to the caller.

use anyhow::{Context, Result};

use crate::engine::{
    event::{Event, Trigger},
    state::EngineState,
};

/// Per-batch work performed by an engine.
pub trait Step {
    type Batch;
    type Output;

    fn step(&mut self, state: &EngineState<Self::Output>, batch: Self::Batch) -> Result<Self::Output>;
}

/// Reacts to engine events. Handlers get the engine state and the
/// step itself, so a controller can read the model or adjust the
/// optimizer it owns.
pub trait Handler<S: Step> {
    fn handle(&mut self, event: Event, state: &mut EngineState<S::Output>, step: &mut S) -> Result<()>;
}

/// Adapts a closure into a `Handler`.
pub struct FnHandler<F>(pub F);

impl<S, F> Handler<S> for FnHandler<F>
where
    S: Step,
    F: FnMut(Event, &mut EngineState<S::Output>, &mut S) -> Result<()>,
{
    fn handle(&mut self, event: Event, state: &mut EngineState<S::Output>, step: &mut S) -> Result<()> {
        (self.0)(event, state, step)
    }
}

/// A finite sequence of batches that can be replayed once per epoch.
/// A batch that cannot be produced is an error, never a short epoch.
pub trait DataSource<I> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<I>> + '_>;
}

impl<I: Clone> DataSource<I> for Vec<I> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<I>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

struct Registration<S: Step> {
    triggers: Vec<Trigger>,
    handler:  Box<dyn Handler<S>>,
}

pub struct Engine<S: Step> {
    name:     &'static str,
    step:     S,
    handlers: Vec<Registration<S>>,
    state:    EngineState<S::Output>,
}

impl<S: Step> Engine<S> {
    pub fn new(name: &'static str, step: S) -> Self {
        Self { name, step, handlers: Vec::new(), state: EngineState::default() }
    }

    /// Register `handler` for every trigger in `triggers`.
    pub fn on<T, H>(&mut self, triggers: impl IntoIterator<Item = T>, handler: H) -> &mut Self
    where
        T: Into<Trigger>,
        H: Handler<S> + 'static,
    {
        self.handlers.push(Registration {
            triggers: triggers.into_iter().map(Into::into).collect(),
            handler:  Box::new(handler),
        });
        self
    }

    /// Register a closure handler.
    pub fn on_fn<T, F>(&mut self, triggers: impl IntoIterator<Item = T>, f: F) -> &mut Self
    where
        T: Into<Trigger>,
        F: FnMut(Event, &mut EngineState<S::Output>, &mut S) -> Result<()> + 'static,
    {
        self.on(triggers, FnHandler(f))
    }

    pub fn state(&self) -> &EngineState<S::Output> {
        &self.state
    }

    pub fn step_mut(&mut self) -> &mut S {
        &mut self.step
    }

    pub fn into_step(self) -> S {
        self.step
    }

    /// Run `max_epochs` passes over `data`.
    pub fn run(&mut self, data: &impl DataSource<S::Batch>, max_epochs: usize) -> Result<()> {
        self.state.reset(max_epochs);
        tracing::debug!("{} engine: starting run of {} epoch(s)", self.name, max_epochs);

        self.fire(Event::Started)?;

        while self.state.epoch < max_epochs {
            self.state.epoch += 1;
            self.state.clock.resume();
            let epoch_start = std::time::Instant::now();
            self.fire(Event::EpochStarted)?;

            for batch in data.batches() {
                self.state.iteration += 1;
                let batch = batch.with_context(|| {
                    format!(
                        "{} engine: cannot load batch at epoch {}, iteration {}",
                        self.name, self.state.epoch, self.state.iteration
                    )
                })?;
                let output = self.step.step(&self.state, batch).with_context(|| {
                    format!(
                        "{} engine: step failed at epoch {}, iteration {}",
                        self.name, self.state.epoch, self.state.iteration
                    )
                })?;
                self.state.output = Some(output);
                self.fire(Event::IterationCompleted)?;
            }

            self.state.epoch_time = epoch_start.elapsed();
            self.state.clock.pause();
            self.fire(Event::EpochCompleted)?;
        }

        self.fire(Event::Completed)?;
        tracing::debug!("{} engine: run complete", self.name);
        Ok(())
    }

    fn fire(&mut self, event: Event) -> Result<()> {
        let Self { name, step, handlers, state } = self;

        for registration in handlers.iter_mut() {
            let fires = registration
                .triggers
                .iter()
                .any(|t| t.fires(event, state.epoch, state.iteration));
            if fires {
                registration
                    .handler
                    .handle(event, state, step)
                    .with_context(|| format!("{name} engine: {event} handler failed at epoch {}", state.epoch))?;
            }
        }
        Ok(())
    }
}
