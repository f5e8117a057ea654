// ============================================================
// Layer 5 — Engine Layer
// ============================================================
// A small, framework-free event loop shared by training and
// evaluation. It knows nothing about tensors: the per-batch
// work is a `Step`, and every cross-cutting concern is a
// `Handler` subscribed to lifecycle events.
//
//   event.rs  — Event phases and every-N triggers
//   state.rs  — Counters, timing and metrics owned by one engine
//   runner.rs — The Engine loop, Step/Handler/DataSource traits

pub mod event;
pub mod state;
pub mod runner;

pub use event::{Event, Trigger};
pub use runner::{DataSource, Engine, FnHandler, Handler, Step};
pub use state::{EngineState, Metrics};
