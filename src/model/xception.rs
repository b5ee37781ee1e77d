//! Mini-Xception architecture
//!
//! A small fully-convolutional classifier for 48x48 grayscale faces:
//! two plain 3x3 convolutions, four residual blocks built from
//! depthwise-separable convolutions, then a 3x3 convolution to one
//! channel per class followed by global average pooling.
//!
//! Spatial sizes for a 48x48 input: 48 -> 46 -> 44 -> 22 -> 11 -> 6 -> 3 -> 1.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::{Classifier, Task};

/// Configuration for [`MiniXception`]
#[derive(Config, Debug)]
pub struct MiniXceptionConfig {
    /// Number of output classes (7 emotions by default)
    #[config(default = "7")]
    pub num_classes: usize,

    /// Number of input channels (1 for grayscale)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Channels of the two stem convolutions
    #[config(default = "8")]
    pub stem_channels: usize,

    /// Output channels of each residual block
    #[config(default = "vec![16, 32, 64, 128]")]
    pub block_channels: Vec<usize>,
}

impl MiniXceptionConfig {
    /// Default architecture with the head sized for `task`
    pub fn for_task(task: Task) -> Self {
        Self::new().with_num_classes(task.num_classes())
    }
}

/// Conv -> BatchNorm -> ReLU, unpadded
#[derive(Module, Debug)]
pub struct StemConv<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    relu: Relu,
}

impl<B: Backend> StemConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Depthwise 3x3 followed by pointwise 1x1
#[derive(Module, Debug)]
pub struct SeparableConv<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
}

impl<B: Backend> SeparableConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let depthwise = Conv2dConfig::new([in_channels, in_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(in_channels)
            .with_bias(false)
            .init(device);
        let pointwise = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_bias(false)
            .init(device);

        Self {
            depthwise,
            pointwise,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// Residual block halving the spatial size
#[derive(Module, Debug)]
pub struct XceptionBlock<B: Backend> {
    shortcut: Conv2d<B>,
    shortcut_bn: BatchNorm<B>,
    sep1: SeparableConv<B>,
    bn1: BatchNorm<B>,
    sep2: SeparableConv<B>,
    bn2: BatchNorm<B>,
    pool: MaxPool2d,
    relu: Relu,
}

impl<B: Backend> XceptionBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            shortcut: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([2, 2])
                .with_bias(false)
                .init(device),
            shortcut_bn: BatchNormConfig::new(out_channels).init(device),
            sep1: SeparableConv::new(in_channels, out_channels, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            sep2: SeparableConv::new(out_channels, out_channels, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.shortcut_bn.forward(self.shortcut.forward(x.clone()));

        let x = self.relu.forward(self.bn1.forward(self.sep1.forward(x)));
        let x = self.bn2.forward(self.sep2.forward(x));
        let x = self.pool.forward(x);

        x + residual
    }
}

/// Mini-Xception face classifier
#[derive(Module, Debug)]
pub struct MiniXception<B: Backend> {
    stem1: StemConv<B>,
    stem2: StemConv<B>,
    blocks: Vec<XceptionBlock<B>>,
    head: Conv2d<B>,
    global_pool: AdaptiveAvgPool2d,
    num_classes: usize,
}

impl<B: Backend> MiniXception<B> {
    /// Build a randomly initialised network
    pub fn new(config: &MiniXceptionConfig, device: &B::Device) -> Self {
        let stem1 = StemConv::new(config.in_channels, config.stem_channels, device);
        let stem2 = StemConv::new(config.stem_channels, config.stem_channels, device);

        let mut blocks = Vec::with_capacity(config.block_channels.len());
        let mut channels = config.stem_channels;
        for &out in &config.block_channels {
            blocks.push(XceptionBlock::new(channels, out, device));
            channels = out;
        }

        let head = Conv2dConfig::new([channels, config.num_classes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            stem1,
            stem2,
            blocks,
            head,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            num_classes: config.num_classes,
        }
    }

    /// Logits with shape `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = self.stem2.forward(self.stem1.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.global_pool.forward(self.head.forward(x));

        // [B, C, 1, 1] -> [B, C]; a reshape keeps a batch of one two-dimensional
        x.reshape([batch_size, self.num_classes])
    }
}

impl<B: Backend> Classifier<B> for MiniXception<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        MiniXception::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
