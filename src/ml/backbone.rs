// ============================================================
// Layer 5 — Face Backbones
// ============================================================
// Every backbone maps a [N, 3, 112, 112] batch to a
// [N, feature_dim] embedding and ends on a 7×7 feature map
// before its head:
//
//   MobileFace   3×3/2 stem, depthwise stem, inverted residual stages
//                [t, c, n, s] = [2,64,5,2] [4,128,1,2] [2,128,6,1]
//                               [4,128,1,2] [2,128,2,1]
//                head: 1×1 → 512, 7×7 depthwise (GDConv), 1×1 → feat
//
//   Res50/101    3×3/1 stem, bottleneck stages [3,4,6,3] / [3,4,23,3]
//   Res50-IR     3×3/1 stem, IR stages [3,4,14,3], filters 64→512
//   SERes50-IR   as Res50-IR with squeeze-excitation in every unit
//                head: BN → Dropout(0.4) → flatten → Linear → BN
//
// One struct holds all variants; unused slots stay `None`.
//
// Reference: Chen et al. (2018) MobileFaceNets

use anyhow::Result;
use burn::{
    module::ParamId,
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::domain::architecture::BackboneKind;
use crate::domain::params::ParamEntry;
use crate::domain::state_dict::StateDict;
use crate::ml::layers::{conv_bn, Activation, ConvBn, ResidualBlock, RESNET_EXPANSION};
use crate::ml::named_params::{join, NamedParams};

pub const FINAL_MAP: usize = 7;
pub const HEAD_DROPOUT: f64 = 0.4;

const MOBILEFACE_SETTINGS: [[usize; 4]; 5] =
    [[2, 64, 5, 2], [4, 128, 1, 2], [2, 128, 6, 1], [4, 128, 1, 2], [2, 128, 2, 1]];
const IR50_UNITS: [usize; 4] = [3, 4, 14, 3];
const IR_FILTERS: [usize; 5] = [64, 64, 128, 256, 512];
const RES50_LAYERS: [usize; 4] = [3, 4, 6, 3];
const RES101_LAYERS: [usize; 4] = [3, 4, 23, 3];
const RES_PLANES: [usize; 4] = [64, 128, 256, 512];

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub kind:        BackboneKind,
    #[config(default = 128)]
    pub feature_dim: usize,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FaceBackbone<B> {
        let (stem, blocks, head) = match self.kind {
            BackboneKind::MobileFace => self.mobileface(device),
            BackboneKind::Res50 => self.resnet(device, &RES50_LAYERS),
            BackboneKind::Res101 => self.resnet(device, &RES101_LAYERS),
            BackboneKind::Res50Ir => self.resnet_ir(device, false),
            BackboneKind::SeRes50Ir => self.resnet_ir(device, true),
        };
        FaceBackbone { stem, blocks, head, feature_dim: self.feature_dim }
    }

    fn mobileface<B: Backend>(
        &self,
        device: &B::Device,
    ) -> (Vec<ConvBn<B>>, Vec<ResidualBlock<B>>, EmbeddingHead<B>) {
        let stem = vec![
            conv_bn(device, [3, 64], 3, 2, 1, 1, Activation::PRelu),
            conv_bn(device, [64, 64], 3, 1, 1, 64, Activation::PRelu),
        ];

        let mut blocks = Vec::new();
        let mut in_c = 64;
        for [t, c, n, s] in MOBILEFACE_SETTINGS {
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(ResidualBlock::mobile(device, in_c, c, stride, t));
                in_c = c;
            }
        }

        let head = EmbeddingHead {
            convs: vec![
                conv_bn(device, [in_c, 512], 1, 1, 0, 1, Activation::PRelu),
                conv_bn(device, [512, 512], FINAL_MAP, 1, 0, 512, Activation::Linear),
                conv_bn(device, [512, self.feature_dim], 1, 1, 0, 1, Activation::Linear),
            ],
            bn: None,
            dropout: None,
            fc: None,
            feature_bn: None,
        };
        (stem, blocks, head)
    }

    fn resnet<B: Backend>(
        &self,
        device: &B::Device,
        layers: &[usize; 4],
    ) -> (Vec<ConvBn<B>>, Vec<ResidualBlock<B>>, EmbeddingHead<B>) {
        let stem = vec![conv_bn(device, [3, 64], 3, 1, 1, 1, Activation::Relu)];

        let mut blocks = Vec::new();
        let mut in_c = 64;
        for (planes, count) in RES_PLANES.iter().zip(layers) {
            for i in 0..*count {
                let stride = if i == 0 { 2 } else { 1 };
                blocks.push(ResidualBlock::bottleneck(device, in_c, *planes, stride));
                in_c = planes * RESNET_EXPANSION;
            }
        }

        (stem, blocks, self.linear_head(device, in_c))
    }

    fn resnet_ir<B: Backend>(
        &self,
        device:  &B::Device,
        with_se: bool,
    ) -> (Vec<ConvBn<B>>, Vec<ResidualBlock<B>>, EmbeddingHead<B>) {
        let stem = vec![conv_bn(device, [3, IR_FILTERS[0]], 3, 1, 1, 1, Activation::PRelu)];

        let mut blocks = Vec::new();
        for (stage, units) in IR50_UNITS.iter().enumerate() {
            let (in_c, out_c) = (IR_FILTERS[stage], IR_FILTERS[stage + 1]);
            blocks.push(ResidualBlock::ir(device, in_c, out_c, 2, with_se));
            for _ in 1..*units {
                blocks.push(ResidualBlock::ir(device, out_c, out_c, 1, with_se));
            }
        }

        (stem, blocks, self.linear_head(device, IR_FILTERS[4]))
    }

    fn linear_head<B: Backend>(&self, device: &B::Device, channels: usize) -> EmbeddingHead<B> {
        EmbeddingHead {
            convs:      Vec::new(),
            bn:         Some(BatchNormConfig::new(channels).init(device)),
            dropout:    Some(DropoutConfig::new(HEAD_DROPOUT).init()),
            fc:         Some(
                LinearConfig::new(channels * FINAL_MAP * FINAL_MAP, self.feature_dim).init(device),
            ),
            feature_bn: Some(BatchNormConfig::new(self.feature_dim).init(device)),
        }
    }
}

// ─── EmbeddingHead ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EmbeddingHead<B: Backend> {
    pub convs:      Vec<ConvBn<B>>,
    pub bn:         Option<BatchNorm<B, 2>>,
    pub dropout:    Option<Dropout>,
    pub fc:         Option<Linear<B>>,
    /// Applied to the embedding reshaped to [N, F, 1, 1].
    pub feature_bn: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> EmbeddingHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for conv in &self.convs {
            x = conv.forward(x);
        }
        if let Some(bn) = &self.bn {
            x = bn.forward(x);
        }
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }

        let mut features: Tensor<B, 2> = x.flatten(1, 3);
        if let Some(fc) = &self.fc {
            features = fc.forward(features);
        }
        if let Some(bn) = &self.feature_bn {
            let [n, f] = features.dims();
            features = bn.forward(features.reshape([n, f, 1, 1])).reshape([n, f]);
        }
        features
    }
}

impl<B: Backend> NamedParams<B> for EmbeddingHead<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        self.convs.export(&join(prefix, "convs"), dict);
        self.bn.export(&join(prefix, "bn"), dict);
        self.fc.export(&join(prefix, "fc"), dict);
        self.feature_bn.export(&join(prefix, "feature_bn"), dict);
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.convs = self.convs.import(&join(prefix, "convs"), dict)?;
        self.bn = self.bn.import(&join(prefix, "bn"), dict)?;
        self.fc = self.fc.import(&join(prefix, "fc"), dict)?;
        self.feature_bn = self.feature_bn.import(&join(prefix, "feature_bn"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        self.convs.param_entries(&join(prefix, "convs"), out);
        self.bn.param_entries(&join(prefix, "bn"), out);
        self.fc.param_entries(&join(prefix, "fc"), out);
        self.feature_bn.param_entries(&join(prefix, "feature_bn"), out);
    }
}

// ─── FaceBackbone ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FaceBackbone<B: Backend> {
    pub stem:        Vec<ConvBn<B>>,
    pub blocks:      Vec<ResidualBlock<B>>,
    pub head:        EmbeddingHead<B>,
    pub feature_dim: usize,
}

impl<B: Backend> FaceBackbone<B> {
    /// [N, 3, 112, 112] → [N, feature_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for layer in &self.stem {
            x = layer.forward(x);
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }
}

impl<B: Backend> NamedParams<B> for FaceBackbone<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        self.stem.export(&join(prefix, "stem"), dict);
        self.blocks.export(&join(prefix, "blocks"), dict);
        self.head.export(&join(prefix, "head"), dict);
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.stem = self.stem.import(&join(prefix, "stem"), dict)?;
        self.blocks = self.blocks.import(&join(prefix, "blocks"), dict)?;
        self.head = self.head.import(&join(prefix, "head"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        self.stem.param_entries(&join(prefix, "stem"), out);
        self.blocks.param_entries(&join(prefix, "blocks"), out);
        self.head.param_entries(&join(prefix, "head"), out);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::ParamRole;
    use crate::ml::named_params::{load_state_dict, param_entries, state_dict};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_mobileface_embedding_shape() {
        let device = Default::default();
        let backbone = BackboneConfig::new(BackboneKind::MobileFace).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 112, 112], &device);

        assert_eq!(backbone.forward(images).dims(), [2, 128]);
    }

    #[test]
    fn test_feature_dim_is_honoured() {
        let device = Default::default();
        let backbone = BackboneConfig::new(BackboneKind::MobileFace)
            .with_feature_dim(64)
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 112, 112], &device);

        assert_eq!(backbone.forward(images).dims(), [2, 64]);
    }

    #[test]
    fn test_layouts_per_kind() {
        let device = Default::default();
        let ir = BackboneConfig::new(BackboneKind::Res50Ir).init::<TestBackend>(&device);
        assert_eq!(ir.blocks.len(), 24);
        assert!(ir.blocks.iter().all(|b| b.se.is_none()));
        assert_eq!(
            ir.head.fc.as_ref().unwrap().weight.dims(),
            [512 * FINAL_MAP * FINAL_MAP, 128]
        );

        let se = BackboneConfig::new(BackboneKind::SeRes50Ir).init::<TestBackend>(&device);
        assert!(se.blocks.iter().all(|b| b.se.is_some()));

        let res50 = BackboneConfig::new(BackboneKind::Res50).init::<TestBackend>(&device);
        assert_eq!(res50.blocks.len(), 16);

        let mobile = BackboneConfig::new(BackboneKind::MobileFace).init::<TestBackend>(&device);
        assert_eq!(mobile.blocks.len(), 15);
    }

    #[test]
    fn test_state_dict_round_trip() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneKind::MobileFace);
        let source = config.init::<TestBackend>(&device);
        let target = config.init::<TestBackend>(&device);

        let dict = state_dict(&source);
        let restored = load_state_dict(target, &dict).unwrap();

        assert_eq!(state_dict(&restored), dict);
    }

    #[test]
    fn test_prelu_slopes_are_activation_params() {
        let device = Default::default();
        let backbone = BackboneConfig::new(BackboneKind::MobileFace).init::<TestBackend>(&device);
        let entries = param_entries(&backbone);

        let activations: Vec<_> = entries
            .iter()
            .filter(|e| e.role == ParamRole::Activation)
            .collect();
        assert!(!activations.is_empty());
        assert!(activations.iter().all(|e| e.name.ends_with("prelu.weight")));
        assert!(entries.iter().any(|e| e.name == "head.convs.2.conv.weight"));
    }
}
