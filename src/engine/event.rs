// ============================================================
// Layer 5 — Engine Events
// ============================================================
// The phases an engine moves through during one run:
//
//   Started
//     └─ { EpochStarted
//            └─ IterationCompleted × batches
//          EpochCompleted } × epochs
//   Completed
//
// Handlers subscribe with a Trigger: an event plus an optional
// "every Nth occurrence" filter.
//
//   Event::EpochCompleted.every(5)  → epochs 5, 10, 15, ...
//   Event::IterationCompleted.into() → every batch

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Started,
    EpochStarted,
    IterationCompleted,
    EpochCompleted,
    Completed,
}

impl Event {
    /// Subscribe to every `n`th occurrence of this event.
    /// `n = 0` is treated as 1.
    pub fn every(self, n: usize) -> Trigger {
        Trigger { event: self, every: n.max(1) }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Started            => "STARTED",
            Event::EpochStarted       => "EPOCH_STARTED",
            Event::IterationCompleted => "ITERATION_COMPLETED",
            Event::EpochCompleted     => "EPOCH_COMPLETED",
            Event::Completed          => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// An event filter attached to a handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub event: Event,
    every:     usize,
}

impl Trigger {
    /// Does this trigger fire for `event` given the engine counters?
    ///
    /// Epoch events count epochs, iteration events count global
    /// iterations. Started and Completed happen once per run.
    pub fn fires(&self, event: Event, epoch: usize, iteration: usize) -> bool {
        if event != self.event {
            return false;
        }
        match event {
            Event::EpochStarted | Event::EpochCompleted => epoch % self.every == 0,
            Event::IterationCompleted                   => iteration % self.every == 0,
            Event::Started | Event::Completed           => true,
        }
    }
}

impl From<Event> for Trigger {
    fn from(event: Event) -> Self {
        event.every(1)
    }
}
