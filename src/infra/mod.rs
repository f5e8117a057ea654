// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the cross-cutting concerns that don't belong in any
// specific business layer:
//
//   checkpoint.rs — Checkpoint directories with retention,
//                   plus run_config.json so the evaluate
//                   command can rebuild the model.
//
//   metrics.rs    — Append-only metric histories written to
//                   metrics_train.csv / metrics_test.csv.
//
//   run_log.rs    — The training.log run log, mirrored to
//                   the console.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Checkpoint saving, retention and lookup
pub mod checkpoint;

/// Metric history tables and CSV output
pub mod metrics;

/// Human-readable run log
pub mod run_log;
