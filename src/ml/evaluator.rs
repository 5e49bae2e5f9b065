// ============================================================
// Layer 5 — Benchmark Evaluator
// ============================================================
// One evaluation of one benchmark:
//
//   pair list ─► PairBatcher ─► inference backbone ─► features
//                                   (valid(), no autodiff)
//        feature of an image = embed(image) ‖ embed(mirror(image))
//
//   features ─► <result dir>/cur_epoch_<bench>_result.json
//            ─► read back ─► ten_fold_accuracy ─► per-fold accuracies
//
// Loaders are built once per benchmark and reused every cycle.

use std::sync::Arc;

use anyhow::{bail, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    prelude::*,
};

use crate::data::batcher::{PairBatch, PairBatcher};
use crate::data::pairs::PairDataset;
use crate::domain::accuracy::Benchmark;
use crate::domain::traits::Evaluator;
use crate::infra::results::{PairFeatures, ResultStore};
use crate::ml::backbone::FaceBackbone;
use crate::ml::session::EmbeddingSource;
use crate::ml::verification::ten_fold_accuracy;

pub const EVAL_BATCH_SIZE: usize = 128;
pub const EVAL_WORKERS: usize = 4;

struct BenchmarkLoader<B: Backend> {
    benchmark: Benchmark,
    loader:    Arc<dyn DataLoader<PairBatch<B>>>,
    pairs:     usize,
}

pub struct BenchmarkEvaluator<B: Backend> {
    loaders: Vec<BenchmarkLoader<B>>,
    results: ResultStore,
}

/// [N, 2F] rows: embedding of each image followed by that of its mirror.
fn embed<B: Backend>(
    backbone: &FaceBackbone<B>,
    images:   Tensor<B, 4>,
    flipped:  Tensor<B, 4>,
) -> Vec<Vec<f32>> {
    let features = Tensor::cat(vec![backbone.forward(images), backbone.forward(flipped)], 1);
    let [_, dim] = features.dims();
    let values: Vec<f32> = features.into_data().iter::<f32>().collect();
    values.chunks(dim).map(<[f32]>::to_vec).collect()
}

impl<B: Backend> BenchmarkEvaluator<B> {
    pub fn new(datasets: Vec<PairDataset>, results: ResultStore, device: B::Device) -> Self {
        let loaders = datasets
            .into_iter()
            .map(|dataset| {
                let benchmark = dataset.benchmark();
                let pairs = dataset.len();
                let loader = DataLoaderBuilder::new(PairBatcher::<B>::new(device.clone()))
                    .batch_size(EVAL_BATCH_SIZE)
                    .num_workers(EVAL_WORKERS)
                    .build(dataset);
                BenchmarkLoader { benchmark, loader, pairs }
            })
            .collect();
        Self { loaders, results }
    }

    pub fn extract(&self, backbone: &FaceBackbone<B>, benchmark: Benchmark) -> Result<PairFeatures> {
        let Some(entry) = self.loaders.iter().find(|l| l.benchmark == benchmark) else {
            bail!("no pair list loaded for {benchmark}");
        };

        let mut features = PairFeatures::default();
        for batch in entry.loader.iter() {
            let left = embed(backbone, batch.left, batch.left_flipped);
            let right = embed(backbone, batch.right, batch.right_flipped);
            for (((l, r), fold), flag) in left.into_iter().zip(right).zip(batch.folds).zip(batch.flags) {
                features.push(l, r, fold, flag);
            }
        }

        if features.len() != entry.pairs {
            bail!(
                "{benchmark}: extracted {} of {} pairs; an image failed to load",
                features.len(),
                entry.pairs
            );
        }
        Ok(features)
    }
}

impl<B, S> Evaluator<S> for BenchmarkEvaluator<B>
where
    B: Backend,
    S: EmbeddingSource<Inference = B>,
{
    fn evaluate(&mut self, session: &S, benchmark: Benchmark) -> Result<Vec<f64>> {
        let backbone = session.inference_backbone();
        let features = self.extract(&backbone, benchmark)?;
        let path = self.results.save(benchmark, &features)?;
        let features = ResultStore::load(&path)?;
        ten_fold_accuracy(&features)
    }
}
