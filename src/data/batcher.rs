// ============================================================
// Layer 4 — Batchers
// ============================================================
// Implement Burn's Batcher trait to stack decoded samples into
// tensors:
//
//   FaceBatcher  Vec<FaceSample> → images [N, 3, 112, 112], labels [N]
//   PairBatcher  Vec<PairSample> → four image tensors + fold/flag metadata
//
// Every sample is already 3×112×112, so batching is a flatten
// followed by a reshape. Pair batches keep their fold and flag
// next to the tensors, so the order in which loader workers
// hand batches back does not matter.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::FaceSample;
use crate::data::pairs::PairSample;
use crate::data::preprocess::{CHANNELS, IMAGE_SIZE};

fn stack_images<'a, B: Backend>(
    images: impl Iterator<Item = &'a Vec<f32>>,
    batch_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let flat: Vec<f32> = images.flat_map(|img| img.iter().copied()).collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device)
        .reshape([batch_size, CHANNELS, IMAGE_SIZE, IMAGE_SIZE])
}

// ─── FaceBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FaceBatch<B: Backend> {
    /// [batch_size, 3, 112, 112]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct FaceBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> FaceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<FaceSample, FaceBatch<B>> for FaceBatcher<B> {
    fn batch(&self, items: Vec<FaceSample>) -> FaceBatch<B> {
        let batch_size = items.len();
        let images = stack_images::<B>(items.iter().map(|s| &s.pixels), batch_size, &self.device);
        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);
        FaceBatch { images, labels }
    }
}

// ─── PairBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    pub left:          Tensor<B, 4>,
    pub left_flipped:  Tensor<B, 4>,
    pub right:         Tensor<B, 4>,
    pub right_flipped: Tensor<B, 4>,
    pub folds:         Vec<usize>,
    pub flags:         Vec<i8>,
}

#[derive(Clone, Debug)]
pub struct PairBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> PairBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<PairSample, PairBatch<B>> for PairBatcher<B> {
    fn batch(&self, items: Vec<PairSample>) -> PairBatch<B> {
        let n = items.len();
        PairBatch {
            left:          stack_images::<B>(items.iter().map(|s| &s.left), n, &self.device),
            left_flipped:  stack_images::<B>(items.iter().map(|s| &s.left_flipped), n, &self.device),
            right:         stack_images::<B>(items.iter().map(|s| &s.right), n, &self.device),
            right_flipped: stack_images::<B>(items.iter().map(|s| &s.right_flipped), n, &self.device),
            folds:         items.iter().map(|s| s.fold).collect(),
            flags:         items.iter().map(|s| s.flag).collect(),
        }
    }
}
