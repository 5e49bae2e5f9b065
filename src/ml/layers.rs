// ============================================================
// Layer 5 — Building Blocks
// ============================================================
// The pieces every backbone is assembled from:
//
//   ConvBn         conv → batch norm → optional PReLU / ReLU
//   SqueezeExcite  global pool → 1×1 reduce → ReLU → 1×1 expand → sigmoid gate
//   ResidualBlock  [pre BN] → body → [SE] → (+ shortcut) → [ReLU]
//
// ResidualBlock covers the three unit shapes used here:
//
//   mobile  1×1 expand → 3×3 depthwise → 1×1 linear project
//           identity shortcut only when stride 1 and channels match
//   ir      BN → 3×3 → BN → PReLU → 3×3(stride) → BN → [SE]
//           1×1 projection shortcut when the shape changes
//   resnet  1×1 → 3×3(stride) → 1×1 (×4 expansion), ReLU after the sum
//
// Reference: Sandler et al. (2018) MobileNetV2
//            Deng et al. (2019) ArcFace (IR units)
//            Hu et al. (2018) Squeeze-and-Excitation Networks

use anyhow::Result;
use burn::{
    module::ParamId,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, PRelu, PReluConfig, Relu,
    },
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

use crate::domain::params::ParamEntry;
use crate::domain::state_dict::StateDict;
use crate::ml::named_params::{join, NamedParams};

pub const SE_REDUCTION: usize = 16;
pub const RESNET_EXPANSION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    PRelu,
}

// ─── ConvBn ───────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv:  Conv2d<B>,
    pub bn:    BatchNorm<B, 2>,
    pub prelu: Option<PRelu<B>>,
    pub relu:  Option<Relu>,
}

/// Bias-free convolution with a square kernel and symmetric padding.
pub fn conv_bn<B: Backend>(
    device:   &B::Device,
    channels: [usize; 2],
    kernel:   usize,
    stride:   usize,
    padding:  usize,
    groups:   usize,
    act:      Activation,
) -> ConvBn<B> {
    let conv = Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .init(device);
    let bn = BatchNormConfig::new(channels[1]).init(device);
    let prelu = (act == Activation::PRelu)
        .then(|| PReluConfig::new().with_num_parameters(channels[1]).init(device));
    let relu = (act == Activation::Relu).then(Relu::new);
    ConvBn { conv, bn, prelu, relu }
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        let x = match &self.prelu {
            Some(prelu) => prelu.forward(x),
            None => x,
        };
        match &self.relu {
            Some(relu) => relu.forward(x),
            None => x,
        }
    }
}

impl<B: Backend> NamedParams<B> for ConvBn<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        self.conv.export(&join(prefix, "conv"), dict);
        self.bn.export(&join(prefix, "bn"), dict);
        self.prelu.export(&join(prefix, "prelu"), dict);
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.conv = self.conv.import(&join(prefix, "conv"), dict)?;
        self.bn = self.bn.import(&join(prefix, "bn"), dict)?;
        self.prelu = self.prelu.import(&join(prefix, "prelu"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        self.conv.param_entries(&join(prefix, "conv"), out);
        self.bn.param_entries(&join(prefix, "bn"), out);
        self.prelu.param_entries(&join(prefix, "prelu"), out);
    }
}

// ─── SqueezeExcite ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub fc1:  Conv2d<B>,
    pub fc2:  Conv2d<B>,
}

pub fn squeeze_excite<B: Backend>(device: &B::Device, channels: usize) -> SqueezeExcite<B> {
    let reduced = (channels / SE_REDUCTION).max(1);
    SqueezeExcite {
        pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        fc1:  Conv2dConfig::new([channels, reduced], [1, 1]).with_bias(false).init(device),
        fc2:  Conv2dConfig::new([reduced, channels], [1, 1]).with_bias(false).init(device),
    }
}

impl<B: Backend> SqueezeExcite<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let gate = self.pool.forward(x.clone());
        let gate = sigmoid(self.fc2.forward(relu(self.fc1.forward(gate))));
        x * gate
    }
}

impl<B: Backend> NamedParams<B> for SqueezeExcite<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        self.fc1.export(&join(prefix, "fc1"), dict);
        self.fc2.export(&join(prefix, "fc2"), dict);
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.fc1 = self.fc1.import(&join(prefix, "fc1"), dict)?;
        self.fc2 = self.fc2.import(&join(prefix, "fc2"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        self.fc1.param_entries(&join(prefix, "fc1"), out);
        self.fc2.param_entries(&join(prefix, "fc2"), out);
    }
}

// ─── ResidualBlock ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub pre_bn:   Option<BatchNorm<B, 2>>,
    pub body:     Vec<ConvBn<B>>,
    pub se:       Option<SqueezeExcite<B>>,
    pub shortcut: Option<ConvBn<B>>,
    /// Add the (possibly projected) input back onto the body output.
    pub residual: bool,
    pub out_relu: Option<Relu>,
}

impl<B: Backend> ResidualBlock<B> {
    /// Inverted residual bottleneck with expansion factor `expansion`.
    pub fn mobile(
        device:    &B::Device,
        in_c:      usize,
        out_c:     usize,
        stride:    usize,
        expansion: usize,
    ) -> Self {
        let hidden = in_c * expansion;
        Self {
            pre_bn: None,
            body: vec![
                conv_bn(device, [in_c, hidden], 1, 1, 0, 1, Activation::PRelu),
                conv_bn(device, [hidden, hidden], 3, stride, 1, hidden, Activation::PRelu),
                conv_bn(device, [hidden, out_c], 1, 1, 0, 1, Activation::Linear),
            ],
            se: None,
            shortcut: None,
            residual: stride == 1 && in_c == out_c,
            out_relu: None,
        }
    }

    /// Improved residual unit, optionally with squeeze-excitation.
    pub fn ir(device: &B::Device, in_c: usize, out_c: usize, stride: usize, with_se: bool) -> Self {
        let projection = (stride != 1 || in_c != out_c)
            .then(|| conv_bn(device, [in_c, out_c], 1, stride, 0, 1, Activation::Linear));
        Self {
            pre_bn: Some(BatchNormConfig::new(in_c).init(device)),
            body: vec![
                conv_bn(device, [in_c, out_c], 3, 1, 1, 1, Activation::PRelu),
                conv_bn(device, [out_c, out_c], 3, stride, 1, 1, Activation::Linear),
            ],
            se: with_se.then(|| squeeze_excite(device, out_c)),
            shortcut: projection,
            residual: true,
            out_relu: None,
        }
    }

    /// Classic ResNet bottleneck; outputs `planes * 4` channels.
    pub fn bottleneck(device: &B::Device, in_c: usize, planes: usize, stride: usize) -> Self {
        let out_c = planes * RESNET_EXPANSION;
        let projection = (stride != 1 || in_c != out_c)
            .then(|| conv_bn(device, [in_c, out_c], 1, stride, 0, 1, Activation::Linear));
        Self {
            pre_bn: None,
            body: vec![
                conv_bn(device, [in_c, planes], 1, 1, 0, 1, Activation::Relu),
                conv_bn(device, [planes, planes], 3, stride, 1, 1, Activation::Relu),
                conv_bn(device, [planes, out_c], 1, 1, 0, 1, Activation::Linear),
            ],
            se: None,
            shortcut: projection,
            residual: true,
            out_relu: Some(Relu::new()),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut y = match &self.pre_bn {
            Some(bn) => bn.forward(x.clone()),
            None => x.clone(),
        };
        for layer in &self.body {
            y = layer.forward(y);
        }
        if let Some(se) = &self.se {
            y = se.forward(y);
        }
        if self.residual {
            let shortcut = match &self.shortcut {
                Some(projection) => projection.forward(x),
                None => x,
            };
            y = y + shortcut;
        }
        match &self.out_relu {
            Some(relu) => relu.forward(y),
            None => y,
        }
    }
}

impl<B: Backend> NamedParams<B> for ResidualBlock<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        self.pre_bn.export(&join(prefix, "pre_bn"), dict);
        self.body.export(&join(prefix, "body"), dict);
        self.se.export(&join(prefix, "se"), dict);
        self.shortcut.export(&join(prefix, "shortcut"), dict);
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.pre_bn = self.pre_bn.import(&join(prefix, "pre_bn"), dict)?;
        self.body = self.body.import(&join(prefix, "body"), dict)?;
        self.se = self.se.import(&join(prefix, "se"), dict)?;
        self.shortcut = self.shortcut.import(&join(prefix, "shortcut"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        self.pre_bn.param_entries(&join(prefix, "pre_bn"), out);
        self.body.param_entries(&join(prefix, "body"), out);
        self.se.param_entries(&join(prefix, "se"), out);
        self.shortcut.param_entries(&join(prefix, "shortcut"), out);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_strided_units_halve_the_feature_map() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([2, 8, 16, 16], &device);

        let mobile = ResidualBlock::<TestBackend>::mobile(&device, 8, 16, 2, 2);
        assert_eq!(mobile.forward(x.clone()).dims(), [2, 16, 8, 8]);

        let ir = ResidualBlock::<TestBackend>::ir(&device, 8, 16, 2, true);
        assert_eq!(ir.forward(x.clone()).dims(), [2, 16, 8, 8]);

        let bottleneck = ResidualBlock::<TestBackend>::bottleneck(&device, 8, 4, 2);
        assert_eq!(bottleneck.forward(x).dims(), [2, 16, 8, 8]);
    }

    #[test]
    fn test_shortcut_only_when_shapes_allow() {
        let device = Default::default();
        assert!(ResidualBlock::<TestBackend>::mobile(&device, 16, 16, 1, 2).residual);
        assert!(!ResidualBlock::<TestBackend>::mobile(&device, 16, 16, 2, 2).residual);
        assert!(ResidualBlock::<TestBackend>::ir(&device, 16, 16, 1, false).shortcut.is_none());
        assert!(ResidualBlock::<TestBackend>::ir(&device, 16, 32, 1, false).shortcut.is_some());
    }

    #[test]
    fn test_block_param_names() {
        let device = Default::default();
        let block = ResidualBlock::<TestBackend>::ir(&device, 32, 32, 1, true);
        let mut dict = StateDict::new();
        block.export("blocks.3", &mut dict);

        assert!(dict.contains("blocks.3.pre_bn.running_var"));
        assert!(dict.contains("blocks.3.body.0.prelu.weight"));
        assert!(dict.contains("blocks.3.body.1.conv.weight"));
        assert!(dict.contains("blocks.3.se.fc1.weight"));
        assert!(!dict.contains("blocks.3.body.1.prelu.weight"));
        assert_eq!(dict.get("blocks.3.se.fc1.weight").unwrap().shape, vec![2, 32, 1, 1]);
    }
}
