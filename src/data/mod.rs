// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a directory of face images and the
// tensor batches the training loop consumes:
//
//   identity folders
//       │
//       ▼
//   list_generator  → `<path> <label>` train list
//       │
//       ▼
//   FaceDataset     → decodes + preprocesses each listed image
//       │
//       ▼
//   FaceBatcher     → [N, 3, 112, 112] images + [N] labels
//       │
//       ▼
//   DataLoader      → shuffled, multi-worker batch stream
//
// Benchmarks take a parallel path: a pair list is parsed into
// PairDataset, and PairBatcher stacks both faces of each pair
// together with their mirrored copies.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Writes train lists from per-identity folders
pub mod list_generator;

/// Decoding, resizing and normalisation of face images
pub mod preprocess;

/// Train-list backed Burn dataset
pub mod dataset;

/// Benchmark pair lists and their Burn dataset
pub mod pairs;

/// Burn batchers for training and evaluation
pub mod batcher;
