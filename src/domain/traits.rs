// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training loop only talks to these three traits. The Burn
// implementations live in Layer 5; tests drive the loop with
// small stubs that return fixed values.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::accuracy::Benchmark;
use crate::domain::state_dict::StateDict;

// ─── BatchSource ──────────────────────────────────────────────────────────────
/// The shuffled training batch stream. Kept apart from the
/// session so batches can be drawn while the session is stepped.
pub trait BatchSource {
    type Batch;

    /// One shuffled pass over the training set.
    fn iter(&self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;

    /// Number of images in a batch.
    fn batch_len(batch: &Self::Batch) -> usize;

    /// Number of images one full pass must yield.
    fn epoch_len(&self) -> usize;

    /// Fails once the stream has lost images it should have yielded.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

// ─── TrainingSession ──────────────────────────────────────────────────────────
/// A backbone, its margin head and their optimizer groups.
pub trait TrainingSession {
    type Batch;

    /// Forward, loss, backward and optimizer step for one batch.
    /// Returns the loss of the batch.
    fn step(&mut self, batch: Self::Batch, lr: f64) -> Result<f64>;

    /// Copy of the backbone parameters (never the replicas).
    fn state_dict(&self) -> StateDict;
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
/// Computes a per-fold verification accuracy distribution
/// (fractions in `[0, 1]`) for one benchmark.
pub trait Evaluator<S: ?Sized> {
    fn evaluate(&mut self, session: &S, benchmark: Benchmark) -> Result<Vec<f64>>;
}
