// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that define the core concepts of a scoring
// run: what an example is, what shape its grid has, which task
// the run performs, and which preconditions can fail.
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O
//   - Only structs, enums and error types

/// A labelled gridded pose
pub mod example;

/// Grid shape descriptor shared by loaders and models
pub mod grid;

/// Pose-only vs pose-and-affinity selection
pub mod task;

/// Named failure types for configuration, training and checkpoints
pub mod error;
