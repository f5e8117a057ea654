// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal (training a model or evaluating a checkpoint).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing of results here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow and its run configuration
pub mod train_use_case;

// Scoring an examples file with a saved checkpoint
pub mod evaluate_use_case;
