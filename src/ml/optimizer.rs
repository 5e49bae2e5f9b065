// ============================================================
// Layer 5 — Optimizer Groups and LR Schedule
// ============================================================
// SGD with Nesterov momentum 0.9, one optimizer per parameter
// group so each group gets its own weight decay:
//
//   base             5e-5
//   margin           5e-4
//   activation-bias  none
//
// All three share the learning rate:
//
//   lr(epoch) = 0.1 × 0.1^k,  k = #{milestones ≤ epoch},  milestones 20, 35, 45
//
// The schedule is a pure function of the epoch, so a resumed
// run picks up exactly where the saved one would have been.
//
// Reference: Sutskever et al. (2013) On the importance of
//            initialization and momentum in deep learning

use burn::optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig};

use crate::domain::params::ParamGroup;

pub const BASE_LR: f64 = 0.1;
pub const LR_GAMMA: f64 = 0.1;
pub const LR_MILESTONES: [usize; 3] = [20, 35, 45];
pub const MOMENTUM: f64 = 0.9;

// ─── LrSchedule ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct LrSchedule {
    base:       f64,
    gamma:      f64,
    milestones: Vec<usize>,
}

impl LrSchedule {
    pub fn multistep(base: f64, gamma: f64, milestones: impl Into<Vec<usize>>) -> Self {
        let mut milestones = milestones.into();
        milestones.sort_unstable();
        Self { base, gamma, milestones }
    }

    /// Learning rate used throughout `epoch` (1-based).
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = self.milestones.iter().filter(|m| **m <= epoch).count();
        self.base * self.gamma.powi(decays as i32)
    }
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self::multistep(BASE_LR, LR_GAMMA, LR_MILESTONES)
    }
}

// ─── SGD per group ────────────────────────────────────────────────────────────
pub fn sgd_config(group: ParamGroup) -> SgdConfig {
    let momentum = MomentumConfig::new()
        .with_momentum(MOMENTUM)
        .with_dampening(0.0)
        .with_nesterov(true);
    SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(group.weight_decay().map(|decay| WeightDecayConfig::new(decay as f32)))
}
