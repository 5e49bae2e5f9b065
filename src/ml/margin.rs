// ============================================================
// Layer 5 — Margin Heads
// ============================================================
// Turn embeddings + labels into margin-adjusted class logits.
// Both heads work on cosine similarity between the normalised
// embedding and the normalised class weights:
//
//   cos θ_j = (x / |x|) · (W_j / |W_j|)
//
//   ArcFace  (s = 32, m = 0.5)   target logit s · cos(θ + m)
//            when cos θ ≤ cos(π − m), fall back to s · (cos θ − sin(π − m) · m)
//   CosFace  (s = 30, m = 0.35)  target logit s · (cos θ − m)
//
// Non-target logits are s · cos θ. The head owns the only
// class-sized parameter, W with shape [feature_dim, classes].
//
// Reference: Deng et al. (2019) ArcFace
//            Wang et al. (2018) CosFace

use std::f64::consts::PI;

use anyhow::Result;
use burn::{
    module::{Param, ParamId},
    nn::{loss::CrossEntropyLossConfig, Initializer},
    prelude::*,
};

use crate::domain::architecture::MarginKind;
use crate::domain::params::{ParamEntry, ParamRole};
use crate::domain::state_dict::StateDict;
use crate::ml::named_params::{entry, export_tensor, import_param, join, NamedParams};

#[derive(Config, Debug)]
pub struct MarginConfig {
    pub kind:        MarginKind,
    pub in_features: usize,
    pub class_count: usize,
}

impl MarginConfig {
    pub fn scale_and_margin(&self) -> (f64, f64) {
        match self.kind {
            MarginKind::ArcFace => (32.0, 0.5),
            MarginKind::CosFace => (30.0, 0.35),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MarginHead<B> {
        let (scale, margin) = self.scale_and_margin();
        let weight = Initializer::XavierUniform { gain: 1.0 }.init_with(
            [self.in_features, self.class_count],
            Some(self.in_features),
            Some(self.class_count),
            device,
        );
        MarginHead { weight, scale, margin, angular: self.kind == MarginKind::ArcFace }
    }
}

#[derive(Module, Debug)]
pub struct MarginHead<B: Backend> {
    /// [feature_dim, classes]
    pub weight:  Param<Tensor<B, 2>>,
    pub scale:   f64,
    pub margin:  f64,
    /// Additive angular margin (ArcFace) instead of additive cosine (CosFace).
    pub angular: bool,
}

fn l2_normalize<B: Backend>(x: Tensor<B, 2>, dim: usize) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(dim).sqrt().clamp_min(1e-12);
    x / norm
}

impl<B: Backend> MarginHead<B> {
    pub fn class_count(&self) -> usize {
        self.weight.dims()[1]
    }

    /// [N, F] → [N, classes]
    pub fn cosine(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        l2_normalize(embeddings, 1).matmul(l2_normalize(self.weight.val(), 0))
    }

    pub fn forward(&self, embeddings: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let cosine = self.cosine(embeddings);
        let [n, classes] = cosine.dims();
        let device = cosine.device();

        let target = if self.angular {
            let (cos_m, sin_m) = (self.margin.cos(), self.margin.sin());
            let threshold = (PI - self.margin).cos();
            let fallback = (PI - self.margin).sin() * self.margin;

            let sine = (cosine.clone().powf_scalar(2.0).neg() + 1.0).clamp(0.0, 1.0).sqrt();
            let phi = cosine.clone() * cos_m - sine * sin_m;
            phi.mask_where(cosine.clone().lower_equal_elem(threshold), cosine.clone() - fallback)
        } else {
            cosine.clone() - self.margin
        };

        let one_hot = Tensor::<B, 2>::zeros([n, classes], &device).scatter(
            1,
            labels.reshape([n, 1]),
            Tensor::ones([n, 1], &device),
        );
        let others = one_hot.clone().neg() + 1.0;
        (one_hot * target + others * cosine) * self.scale
    }

    /// Cross-entropy over the margin-adjusted logits.
    pub fn forward_loss(&self, embeddings: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let logits = self.forward(embeddings, labels.clone());
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, labels)
    }
}

impl<B: Backend> NamedParams<B> for MarginHead<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        dict.insert(join(prefix, "weight"), export_tensor(self.weight.val()));
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.weight = import_param(self.weight, &join(prefix, "weight"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        out.push(entry(&self.weight, join(prefix, "weight"), ParamRole::Weight));
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn identity_head(kind: MarginKind) -> MarginHead<TestBackend> {
        let device = Default::default();
        let config = MarginConfig::new(kind, 2, 2);
        let mut head = config.init::<TestBackend>(&device);
        let eye = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0]], &device);
        head.weight = Param::from_tensor(eye);
        head
    }

    fn logits(head: &MarginHead<TestBackend>, embedding: [f32; 2], label: i64) -> Vec<f32> {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([embedding], &device);
        let y = Tensor::<TestBackend, 1, Int>::from_ints([label], &device);
        head.forward(x, y).into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_logit_shape() {
        let device = Default::default();
        let head = MarginConfig::new(MarginKind::ArcFace, 16, 10).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::ones([4, 16], &device);
        let y = Tensor::<TestBackend, 1, Int>::from_ints([0, 3, 9, 3], &device);

        assert_eq!(head.forward(x, y).dims(), [4, 10]);
        assert_eq!(head.class_count(), 10);
    }

    #[test]
    fn test_arcface_target_logit() {
        let head = identity_head(MarginKind::ArcFace);
        let out = logits(&head, [3.0, 0.0], 0);

        assert!((out[0] - 32.0 * 0.5f32.cos()).abs() < 1e-4);
        assert!(out[1].abs() < 1e-4);
    }

    #[test]
    fn test_arcface_falls_back_past_threshold() {
        let head = identity_head(MarginKind::ArcFace);
        let out = logits(&head, [-1.0, 0.0], 0);

        let expected = 32.0 * (-1.0 - 0.5f32.sin() * 0.5);
        assert!((out[0] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_cosface_target_logit() {
        let head = identity_head(MarginKind::CosFace);
        let out = logits(&head, [0.0, 2.0], 1);

        assert!(out[0].abs() < 1e-4);
        assert!((out[1] - 30.0 * 0.65).abs() < 1e-4);
    }

    #[test]
    fn test_loss_is_finite_scalar() {
        let device = Default::default();
        let head = MarginConfig::new(MarginKind::CosFace, 8, 5).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::ones([3, 8], &device);
        let y = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 4], &device);

        let loss: f32 = head.forward_loss(x, y).into_scalar();
        assert!(loss.is_finite() && loss > 0.0);
    }
}
