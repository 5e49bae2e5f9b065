// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe a face-recognition training
// run, independent of the tensor framework:
//
//   manifest.rs      — one `<path> <label>` line of a train list
//   accuracy.rs      — benchmarks and best-accuracy bookkeeping
//   architecture.rs  — closed sets of backbones / margin heads,
//                      execution strategy, configuration errors
//   state_dict.rs    — named parameter snapshots
//   params.rs        — optimizer parameter groups
//   traits.rs        — seams the training loop is written against
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

pub mod manifest;

pub mod accuracy;

pub mod architecture;

pub mod state_dict;

pub mod params;

pub mod traits;
