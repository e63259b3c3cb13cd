//! Burn classification backbones for MixForge.
//!
//! Two architectures are provided:
//! - `LinearClassifier`: flattened-input MLP baseline.
//! - `ConvClassifier`: strided conv stages with a pooled linear head.
//!
//! Both implement `MixInjection`, the explicit contract manifold-mix needs:
//! the augmenter hands the backbone a `ManifoldPlan` (partner permutation,
//! lambda, target stage) and the backbone blends its own hidden state at that
//! stage instead of receiving a pre-mixed input tensor.

use burn::module::Module;
use burn::nn;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use mix_core::{LambdaForm, ManifoldPlan};

/// Mid-forward mixing capability.
///
/// Stage 0 is the raw input; stage `i` sits after the backbone's `i`-th
/// block. A plan whose `layer` exceeds `mix_stages() - 1` never fires; the
/// training layer validates ranges up front so that cannot happen silently.
pub trait MixInjection<B: Backend> {
    /// Number of positions a manifold blend can land on (input included).
    fn mix_stages(&self) -> usize;

    /// Forward pass, blending the hidden state at `plan.layer` when a plan
    /// is supplied.
    fn forward_mix(&self, input: Tensor<B, 4>, mix: Option<&ManifoldPlan>) -> Tensor<B, 2>;
}

fn partner_indices<B: Backend>(plan: &ManifoldPlan, device: &B::Device) -> Tensor<B, 1, Int> {
    let idx: Vec<i64> = plan.partners.iter().map(|&p| p as i64).collect();
    let n = idx.len();
    Tensor::<B, 1, Int>::from_data(TensorData::new(idx, [n]), device)
}

/// `h = lam * h + (1 - lam) * h[partners]` on a 4-D hidden state.
fn blend_state4<B: Backend>(x: Tensor<B, 4>, plan: &ManifoldPlan) -> Tensor<B, 4> {
    let device = x.device();
    let partner = x.clone().select(0, partner_indices::<B>(plan, &device));
    match &plan.lambda {
        LambdaForm::Shared(lam) => x.mul_scalar(*lam) + partner.mul_scalar(1.0 - *lam),
        LambdaForm::PerSample(lams) => {
            let n = lams.len();
            let lam = Tensor::<B, 1>::from_floats(lams.as_slice(), &device)
                .reshape([n, 1, 1, 1]);
            x * lam.clone() + partner * (lam.neg().add_scalar(1.0))
        }
    }
}

/// Same blend on a 2-D hidden state.
fn blend_state2<B: Backend>(x: Tensor<B, 2>, plan: &ManifoldPlan) -> Tensor<B, 2> {
    let device = x.device();
    let partner = x.clone().select(0, partner_indices::<B>(plan, &device));
    match &plan.lambda {
        LambdaForm::Shared(lam) => x.mul_scalar(*lam) + partner.mul_scalar(1.0 - *lam),
        LambdaForm::PerSample(lams) => {
            let n = lams.len();
            let lam = Tensor::<B, 1>::from_floats(lams.as_slice(), &device).reshape([n, 1]);
            x * lam.clone() + partner * (lam.neg().add_scalar(1.0))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearClassifierConfig {
    /// Flattened input length (`channels * height * width`).
    pub input_dim: usize,
    pub hidden: usize,
    pub num_classes: usize,
}

impl Default for LinearClassifierConfig {
    fn default() -> Self {
        Self {
            input_dim: 3 * 32 * 32,
            hidden: 256,
            num_classes: 10,
        }
    }
}

#[derive(Debug, Module)]
pub struct LinearClassifier<B: Backend> {
    linear1: nn::Linear<B>,
    linear2: nn::Linear<B>,
}

impl<B: Backend> LinearClassifier<B> {
    pub fn new(cfg: LinearClassifierConfig, device: &B::Device) -> Self {
        let linear1 = nn::LinearConfig::new(cfg.input_dim, cfg.hidden).init(device);
        let linear2 = nn::LinearConfig::new(cfg.hidden, cfg.num_classes).init(device);
        Self { linear1, linear2 }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_mix(input, None)
    }
}

impl<B: Backend> MixInjection<B> for LinearClassifier<B> {
    fn mix_stages(&self) -> usize {
        2
    }

    fn forward_mix(&self, input: Tensor<B, 4>, mix: Option<&ManifoldPlan>) -> Tensor<B, 2> {
        let mut input = input;
        if let Some(plan) = mix {
            if plan.layer == 0 {
                input = blend_state4(input, plan);
            }
        }
        let mut x = relu(self.linear1.forward(input.flatten::<2>(1, 3)));
        if let Some(plan) = mix {
            if plan.layer == 1 {
                x = blend_state2(x, plan);
            }
        }
        self.linear2.forward(x)
    }
}

#[derive(Debug, Clone)]
pub struct ConvClassifierConfig {
    pub in_channels: usize,
    /// Output channels per stage; the first stage keeps the input resolution,
    /// each later stage halves it.
    pub channels: Vec<usize>,
    pub num_classes: usize,
}

impl Default for ConvClassifierConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            channels: vec![32, 64, 128],
            num_classes: 10,
        }
    }
}

#[derive(Debug, Module)]
struct ConvStage<B: Backend> {
    conv: nn::conv::Conv2d<B>,
    norm: nn::BatchNorm<B, 2>,
}

impl<B: Backend> ConvStage<B> {
    fn new(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Self {
        let conv = nn::conv::Conv2dConfig::new([in_ch, out_ch], [3, 3])
            .with_stride([stride, stride])
            .with_padding(nn::PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let norm = nn::BatchNormConfig::new(out_ch).init(device);
        Self { conv, norm }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(x)))
    }
}

#[derive(Debug, Module)]
pub struct ConvClassifier<B: Backend> {
    blocks: Vec<ConvStage<B>>,
    pool: nn::pool::AdaptiveAvgPool2d,
    head: nn::Linear<B>,
}

impl<B: Backend> ConvClassifier<B> {
    pub fn new(cfg: ConvClassifierConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(cfg.channels.len());
        let mut in_ch = cfg.in_channels;
        for (i, &out_ch) in cfg.channels.iter().enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            blocks.push(ConvStage::new(in_ch, out_ch, stride, device));
            in_ch = out_ch;
        }
        let pool = nn::pool::AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let head = nn::LinearConfig::new(in_ch, cfg.num_classes).init(device);
        Self { blocks, pool, head }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_mix(input, None)
    }
}

impl<B: Backend> MixInjection<B> for ConvClassifier<B> {
    fn mix_stages(&self) -> usize {
        self.blocks.len() + 1
    }

    fn forward_mix(&self, input: Tensor<B, 4>, mix: Option<&ManifoldPlan>) -> Tensor<B, 2> {
        let mut x = input;
        if let Some(plan) = mix {
            if plan.layer == 0 {
                x = blend_state4(x, plan);
            }
        }
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if let Some(plan) = mix {
                if plan.layer == i + 1 {
                    x = blend_state4(x, plan);
                }
            }
        }
        let x = self.pool.forward(x);
        self.head.forward(x.flatten::<2>(1, 3))
    }
}

pub mod prelude {
    pub use super::{
        ConvClassifier, ConvClassifierConfig, LinearClassifier, LinearClassifierConfig,
        MixInjection,
    };
}
