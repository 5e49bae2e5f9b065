// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains the Burn framework specific code for
// models, optimisation and evaluation. The data layer only uses
// Burn's Dataset/Batcher traits; domain stays free of Burn.
//
// What's in this layer:
//
//   named_params.rs — stable dotted names for every parameter,
//                     state-dict export/import, group roles
//   layers.rs       — conv+BN(+act), squeeze-excitation, and the
//                     residual units the backbones stack
//   backbone.rs     — MobileFaceNet, ResNet-50/101, IR-50, SE-IR-50
//                     with the shared 7×7 embedding head
//   margin.rs       — ArcFace / CosFace heads + cross-entropy
//   optimizer.rs    — grouped Nesterov SGD, multistep LR schedule
//   session.rs      — one optimisation step per batch, on one
//                     device or replicated over several
//   trainer.rs      — the epoch / checkpoint / evaluation loop
//   evaluator.rs    — benchmark feature extraction
//   verification.rs — 10-fold verification accuracy
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Deng et al. (2019) ArcFace
//            Wang et al. (2018) CosFace

/// Parameter naming and state dicts
pub mod named_params;

/// Building blocks shared by the backbones
pub mod layers;

/// Face embedding networks
pub mod backbone;

/// Margin-based classification heads
pub mod margin;

/// SGD groups and learning-rate schedule
pub mod optimizer;

/// Single-device and replicated training steps
pub mod session;

/// Training loop with checkpointing and evaluation
pub mod trainer;

/// Benchmark feature extraction
pub mod evaluator;

/// 10-fold verification accuracy
pub mod verification;
