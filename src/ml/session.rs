// ============================================================
// Layer 5 — Training Session
// ============================================================
// Owns the backbone, the margin head and the three SGD groups,
// and performs one optimisation step per batch:
//
//   images ─► backbone ─► embeddings ─► margin head ─► CE loss
//                                                        │
//                               backward ◄───────────────┘
//                                  │
//             ┌────────────────────┼───────────────────┐
//             ▼                    ▼                   ▼
//        base grads       activation grads       margin grads
//             │                    │                   │
//        SGD wd 5e-5          SGD wd 0            SGD wd 5e-4
//
// With several devices the batch is cut into contiguous shards,
// one per device. Each device runs a forked replica on its shard
// with the loss weighted by shard size, so the gradients summed
// on the primary device equal the full-batch mean gradient.
// Parameters and optimizer state only ever live on the primary.
//
// The data loader splits its dataset into contiguous per-worker
// chunks, so the whole-dataset shuffle happens in EpochShuffled,
// once per pass, ahead of that split.
//
// Key Burn 0.16 insight:
//   - GradientsParams::from_module takes one module's share out of
//     a `Gradients`, so one backward feeds backbone and margin
//   - fork() keeps parameter ids, so replica gradients line up
//     with the primary's parameters by id

use std::ops::Range;
use std::sync::Arc;

use anyhow::{bail, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, ParamId},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::{FaceBatch, FaceBatcher};
use crate::data::dataset::{EpochShuffled, FaceDataset, FaceSample};
use crate::domain::params::{GroupPartition, ParamEntry, ParamGroup};
use crate::domain::state_dict::StateDict;
use crate::domain::traits::{BatchSource, TrainingSession};
use crate::ml::backbone::FaceBackbone;
use crate::ml::margin::MarginHead;
use crate::ml::named_params::{param_entries, state_dict};
use crate::ml::optimizer::sgd_config;

// ─── LoaderSource ─────────────────────────────────────────────────────────────
pub struct LoaderSource<B: Backend> {
    dataset: Arc<EpochShuffled<FaceDataset, FaceSample>>,
    loader:  Arc<dyn DataLoader<FaceBatch<B>>>,
}

impl<B: Backend> LoaderSource<B> {
    /// `num_workers == 0` loads on the training thread.
    pub fn new(
        dataset:     FaceDataset,
        batch_size:  usize,
        num_workers: usize,
        seed:        u64,
        device:      B::Device,
    ) -> Self {
        let dataset = Arc::new(EpochShuffled::new(Arc::new(dataset), seed));
        let builder = DataLoaderBuilder::new(FaceBatcher::<B>::new(device)).batch_size(batch_size);
        let builder = if num_workers > 0 {
            builder.num_workers(num_workers)
        } else {
            builder
        };
        let loader = builder.build(dataset.clone());
        Self { dataset, loader }
    }
}

impl<B: Backend> BatchSource for LoaderSource<B> {
    type Batch = FaceBatch<B>;

    fn iter(&self) -> Box<dyn Iterator<Item = FaceBatch<B>> + '_> {
        self.dataset.reshuffle();
        Box::new(self.loader.iter())
    }

    fn batch_len(batch: &FaceBatch<B>) -> usize {
        batch.images.dims()[0]
    }

    fn epoch_len(&self) -> usize {
        self.dataset.base().len()
    }

    fn check(&self) -> Result<()> {
        match self.dataset.base().failures() {
            0 => Ok(()),
            n => bail!("{n} training image(s) failed to decode"),
        }
    }
}

// ─── Sharding ─────────────────────────────────────────────────────────────────
/// Contiguous, near-equal shards of `0..n`, at most one per device.
/// Devices left without samples get no shard.
pub fn shard_ranges(n: usize, devices: usize) -> Vec<Range<usize>> {
    if n == 0 || devices == 0 {
        return Vec::new();
    }
    let chunk = n.div_ceil(devices);
    (0..devices)
        .map(|i| (i * chunk).min(n)..((i + 1) * chunk).min(n))
        .filter(|range| !range.is_empty())
        .collect()
}

/// Move one gradient into `to` on `device`, adding it to any
/// gradient already registered there for the same parameter.
fn transfer<B: Backend, const D: usize>(
    from:   &mut GradientsParams,
    to:     &mut GradientsParams,
    id:     ParamId,
    device: &B::Device,
) {
    let Some(grad) = from.remove::<B, D>(id) else {
        return;
    };
    let grad = grad.to_device(device);
    let sum = match to.remove::<B, D>(id) {
        Some(acc) => acc + grad,
        None => grad,
    };
    to.register(id, sum);
}

fn transfer_entry<B: Backend>(
    from:   &mut GradientsParams,
    to:     &mut GradientsParams,
    entry:  &ParamEntry<ParamId>,
    device: &B::Device,
) -> Result<()> {
    match entry.rank {
        1 => transfer::<B, 1>(from, to, entry.id, device),
        2 => transfer::<B, 2>(from, to, entry.id, device),
        3 => transfer::<B, 3>(from, to, entry.id, device),
        4 => transfer::<B, 4>(from, to, entry.id, device),
        rank => bail!("parameter {} has unsupported rank {rank}", entry.name),
    }
    Ok(())
}

#[derive(Default)]
struct GroupGrads {
    base:            GradientsParams,
    margin:          GradientsParams,
    activation_bias: GradientsParams,
}

impl GroupGrads {
    fn group_mut(&mut self, group: ParamGroup) -> &mut GradientsParams {
        match group {
            ParamGroup::Base           => &mut self.base,
            ParamGroup::Margin         => &mut self.margin,
            ParamGroup::ActivationBias => &mut self.activation_bias,
        }
    }
}

// ─── BurnSession ──────────────────────────────────────────────────────────────
pub struct BurnSession<B: AutodiffBackend, OB, OM> {
    backbone:         FaceBackbone<B>,
    margin:           MarginHead<B>,
    groups:           GroupPartition<ParamId>,
    optim_base:       OB,
    optim_activation: OB,
    optim_margin:     OM,
    /// `devices[0]` is the primary device.
    devices:          Vec<B::Device>,
}

/// Partition the parameters and set up one SGD optimizer per group.
pub fn build_session<B: AutodiffBackend>(
    backbone: FaceBackbone<B>,
    margin:   MarginHead<B>,
    devices:  Vec<B::Device>,
) -> Result<BurnSession<B, impl Optimizer<FaceBackbone<B>, B>, impl Optimizer<MarginHead<B>, B>>> {
    if devices.is_empty() {
        bail!("at least one device is required");
    }
    let groups = GroupPartition::partition(param_entries(&backbone), param_entries(&margin))?;
    tracing::info!(
        "Parameter groups: base={}, activation-bias={}, margin={}",
        groups.base.len(),
        groups.activation_bias.len(),
        groups.margin.len(),
    );

    Ok(BurnSession {
        backbone,
        margin,
        groups,
        optim_base:       sgd_config(ParamGroup::Base).init::<B, FaceBackbone<B>>(),
        optim_activation: sgd_config(ParamGroup::ActivationBias).init::<B, FaceBackbone<B>>(),
        optim_margin:     sgd_config(ParamGroup::Margin).init::<B, MarginHead<B>>(),
        devices,
    })
}

impl<B: AutodiffBackend, OB, OM> BurnSession<B, OB, OM> {
    pub fn backbone(&self) -> &FaceBackbone<B> {
        &self.backbone
    }

    pub fn margin(&self) -> &MarginHead<B> {
        &self.margin
    }

    pub fn groups(&self) -> &GroupPartition<ParamId> {
        &self.groups
    }

    /// Weighted loss and per-group gradients on the primary device.
    fn backward(&self, batch: FaceBatch<B>) -> Result<(f64, GroupGrads)> {
        let n = batch.images.dims()[0];
        let primary = &self.devices[0];
        let mut out = GroupGrads::default();
        let mut losses = Vec::with_capacity(self.devices.len());

        for (i, range) in shard_ranges(n, self.devices.len()).into_iter().enumerate() {
            let device = &self.devices[i];
            let weight = range.len() as f64 / n as f64;
            let (backbone, margin) = if i == 0 {
                (self.backbone.clone(), self.margin.clone())
            } else {
                (self.backbone.clone().fork(device), self.margin.clone().fork(device))
            };
            let images = batch.images.clone().slice([range.clone()]).to_device(device);
            let labels = batch.labels.clone().slice([range]).to_device(device);

            let loss = margin.forward_loss(backbone.forward(images), labels) * weight;
            let mut grads = loss.backward();
            losses.push(loss);
            let mut backbone_grads = GradientsParams::from_module(&mut grads, &backbone);
            let mut margin_grads = GradientsParams::from_module(&mut grads, &margin);

            for group in [ParamGroup::Base, ParamGroup::ActivationBias] {
                for entry in self.groups.group(group) {
                    transfer_entry::<B::InnerBackend>(&mut backbone_grads, out.group_mut(group), entry, primary)?;
                }
            }
            for entry in self.groups.group(ParamGroup::Margin) {
                transfer_entry::<B::InnerBackend>(&mut margin_grads, &mut out.margin, entry, primary)?;
            }
        }

        // Read back only after every shard has been queued.
        let total_loss: f64 = losses.into_iter().map(|loss| loss.into_scalar().elem::<f64>()).sum();
        Ok((total_loss, out))
    }
}

impl<B, OB, OM> TrainingSession for BurnSession<B, OB, OM>
where
    B:  AutodiffBackend,
    OB: Optimizer<FaceBackbone<B>, B>,
    OM: Optimizer<MarginHead<B>, B>,
{
    type Batch = FaceBatch<B>;

    fn step(&mut self, batch: FaceBatch<B>, lr: f64) -> Result<f64> {
        let (loss, grads) = self.backward(batch)?;
        let GroupGrads { base, margin, activation_bias } = grads;

        self.backbone = self.optim_base.step(lr, self.backbone.clone(), base);
        self.backbone = self.optim_activation.step(lr, self.backbone.clone(), activation_bias);
        self.margin = self.optim_margin.step(lr, self.margin.clone(), margin);
        Ok(loss)
    }

    fn state_dict(&self) -> StateDict {
        state_dict(&self.backbone)
    }
}

// ─── EmbeddingSource ──────────────────────────────────────────────────────────
/// Anything that can hand out an inference-mode copy of its backbone.
pub trait EmbeddingSource {
    type Inference: Backend;

    fn inference_backbone(&self) -> FaceBackbone<Self::Inference>;
}

impl<B: AutodiffBackend, OB, OM> EmbeddingSource for BurnSession<B, OB, OM> {
    type Inference = B::InnerBackend;

    /// model.valid() drops autodiff and switches dropout/batch norm
    /// to evaluation behaviour.
    fn inference_backbone(&self) -> FaceBackbone<B::InnerBackend> {
        self.backbone.valid()
    }
}
