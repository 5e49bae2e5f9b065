// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that touch the filesystem:
//
//   checkpoint.rs — `(epoch, state dict)` snapshots as
//                   safetensors files named `NNN.ckpt`
//
//   logging.rs    — the process-wide tracing subscriber
//                   (console + run-directory log file)
//
//   results.rs    — per-benchmark feature files written by the
//                   evaluator and read back for scoring
//
// Reference: Rust Book §9 (Error Handling with anyhow)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Log sink setup
pub mod logging;

/// Evaluation result files
pub mod results;
