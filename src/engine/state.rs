// ============================================================
// Layer 5 — Engine State
// ============================================================
// Everything an engine knows about the run in progress. It is
// owned by the engine, reset when a run starts, and handed to
// handlers by mutable reference while an event is processed.

use std::time::{Duration, Instant};

/// Ordered metric name → value mapping.
///
/// Insertion order is preserved so logs and CSV columns come out
/// in the order the metrics were registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    entries: Vec<(String, f64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, keeping its position if already present.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None        => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pausable elapsed-time accumulator.
#[derive(Debug, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running:     Option<Instant>,
}

impl Stopwatch {
    pub fn resume(&mut self) {
        if self.running.is_none() {
            self.running = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(start) = self.running.take() {
            self.accumulated += start.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Counters, timings, latest output and latest metrics of one engine.
#[derive(Debug)]
pub struct EngineState<O> {
    /// Completed or in-progress epoch, starting from 1 (0 before the first)
    pub epoch: usize,

    /// Global iteration counter across all epochs
    pub iteration: usize,

    pub max_epochs: usize,

    /// Output of the most recent step
    pub output: Option<O>,

    /// Metrics of the most recent evaluation pass
    pub metrics: Metrics,

    /// Wall time of the last completed epoch
    pub epoch_time: Duration,

    pub(crate) clock: Stopwatch,
}

impl<O> Default for EngineState<O> {
    fn default() -> Self {
        Self {
            epoch:      0,
            iteration:  0,
            max_epochs: 0,
            output:     None,
            metrics:    Metrics::new(),
            epoch_time: Duration::ZERO,
            clock:      Stopwatch::default(),
        }
    }
}

impl<O> EngineState<O> {
    pub(crate) fn reset(&mut self, max_epochs: usize) {
        *self = Self { max_epochs, ..Self::default() };
    }

    /// Accumulated time spent inside epochs, excluding the time
    /// handlers spend on EpochCompleted.
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}
