//! Burn ResNet backbones for ECG scan classification.
//!
//! `ResNet` is the torchvision-style residual network (basic blocks, 18 or 34 layers):
//! a 7x7 stride-2 stem, max pooling, four residual stages, global average pooling and a
//! linear head. The head can be swapped for a task-specific one with [`ResNet::with_head`],
//! which is how a 1000-class pretrained backbone becomes a 4-class ECG classifier.
//!
//! These are pure Burn modules; loss, metrics and checkpoint handling live in `ecg_training`.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Number of classes of the ImageNet head that pretrained records carry.
pub const IMAGENET_CLASSES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResNetKind {
    ResNet18,
    ResNet34,
}

impl ResNetKind {
    /// Basic blocks per stage.
    pub fn blocks(self) -> [usize; 4] {
        match self {
            ResNetKind::ResNet18 => [2, 2, 2, 2],
            ResNetKind::ResNet34 => [3, 4, 6, 3],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNetConfig {
    pub kind: ResNetKind,
    /// Channels of the stem and first stage; later stages double it (64 for the standard nets).
    pub base_width: usize,
    pub num_classes: usize,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            kind: ResNetKind::ResNet34,
            base_width: 64,
            num_classes: IMAGENET_CLASSES,
        }
    }
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

/// 1x1 projection used when a block changes resolution or width.
#[derive(Debug, Module)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));
        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(input.clone()),
            None => input.clone(),
        };
        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        relu(x + identity)
    }
}

#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    head_in: usize,
}

impl<B: Backend> ResNet<B> {
    pub fn new(cfg: &ResNetConfig, device: &B::Device) -> Self {
        let width = cfg.base_width.max(1);
        let conv1 = Conv2dConfig::new([3, width], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(width).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [n1, n2, n3, n4] = cfg.kind.blocks();
        let layer1 = make_stage(width, width, n1, 1, device);
        let layer2 = make_stage(width, width * 2, n2, 2, device);
        let layer3 = make_stage(width * 2, width * 4, n3, 2, device);
        let layer4 = make_stage(width * 4, width * 8, n4, 2, device);

        let head_in = width * 8;
        Self {
            conv1,
            bn1,
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(head_in, cfg.num_classes.max(1)).init(device),
            head_in,
        }
    }

    /// Replace the classification head with a freshly initialized `head_in -> num_classes` layer.
    pub fn with_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.fc = LinearConfig::new(self.head_in, num_classes.max(1)).init(device);
        self
    }

    pub fn head_in_features(&self) -> usize {
        self.head_in
    }

    /// Pooled features before the head, shape [batch, head_in].
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.bn1.forward(self.conv1.forward(images)));
        let mut x = self.maxpool.forward(x);
        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }
        let x = self.avgpool.forward(x);
        let batch = x.dims()[0];
        x.reshape([batch, self.head_in])
    }

    /// Class logits, shape [batch, num_classes].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(self.features(images))
    }
}

fn make_stage<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    let mut stage = Vec::with_capacity(blocks);
    stage.push(BasicBlock::new(in_channels, out_channels, stride, device));
    for _ in 1..blocks {
        stage.push(BasicBlock::new(out_channels, out_channels, 1, device));
    }
    stage
}

pub mod prelude {
    pub use super::{BasicBlock, ResNet, ResNetConfig, ResNetKind, IMAGENET_CLASSES};
}
