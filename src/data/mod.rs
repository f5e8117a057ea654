// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from the examples file all the
// way to device-resident tensor batches.
//
// The pipeline flows in this order:
//
//   examples file (.types)
//       │
//       ▼
//   types_file   → parses label / affinity / grid path per line
//       │
//       ▼
//   GridDataset  → implements Burn's Dataset trait, reads grids lazily
//       │
//       ▼
//   GridBatcher  → stacks examples into tensor batches
//       │
//       ▼
//   GridLoader   → feeds batches to the engines, once per pass
//
// Each module is responsible for exactly one step.

/// Parses the whitespace-separated examples file
pub mod types_file;

/// Implements Burn's Dataset trait over precomputed grid files
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Restartable DataLoader wrapper exposing the grid shape
pub mod loader;
