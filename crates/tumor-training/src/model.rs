//! Inception-ResNet-v2 backbone and the binary classification head.
//!
//! Layer widths and block layout follow the Keras application model so that
//! converted ImageNet weights map one-to-one onto the backbone. Every
//! convolution outside the residual up-projections is bias-free and
//! followed by batch norm and ReLU. Nothing is frozen.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// Backbone configuration
#[derive(Config, Debug)]
pub struct InceptionResNetV2Config {
    /// Number of 35x35 residual blocks
    #[config(default = "10")]
    pub block35_repeats: usize,

    /// Number of 17x17 residual blocks
    #[config(default = "20")]
    pub block17_repeats: usize,

    /// Number of 8x8 residual blocks before the final linear one
    #[config(default = "9")]
    pub block8_repeats: usize,

    #[config(default = "1e-3")]
    pub bn_epsilon: f64,
}

/// Full classifier configuration, persisted as the architecture file
#[derive(Config, Debug)]
pub struct TumorClassifierConfig {
    pub backbone: InceptionResNetV2Config,

    /// Width of the dense layer on top of the pooled features
    #[config(default = "500")]
    pub hidden_units: usize,

    #[config(default = "2")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "256")]
    pub input_size: usize,
}

/// Channels produced by the backbone
pub const BACKBONE_CHANNELS: usize = 1536;

#[derive(Clone, Copy, Debug)]
enum Pad {
    Same,
    Valid,
}

/// One conv2d_bn layer description
#[derive(Clone, Copy, Debug)]
struct ConvSpec {
    channels: [usize; 2],
    kernel: [usize; 2],
    stride: usize,
    pad: Pad,
}

fn same(c_in: usize, c_out: usize, kernel: [usize; 2]) -> ConvSpec {
    ConvSpec {
        channels: [c_in, c_out],
        kernel,
        stride: 1,
        pad: Pad::Same,
    }
}

fn valid(c_in: usize, c_out: usize, kernel: usize, stride: usize) -> ConvSpec {
    ConvSpec {
        channels: [c_in, c_out],
        kernel: [kernel, kernel],
        stride,
        pad: Pad::Valid,
    }
}

/// Bias-free convolution, batch norm, ReLU
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBn<B> {
    fn new(spec: ConvSpec, bn_epsilon: f64, device: &B::Device) -> Self {
        let padding = match spec.pad {
            Pad::Same => PaddingConfig2d::Same,
            Pad::Valid => PaddingConfig2d::Valid,
        };
        let conv = Conv2dConfig::new(spec.channels, spec.kernel)
            .with_stride([spec.stride, spec.stride])
            .with_padding(padding)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(spec.channels[1])
            .with_epsilon(bn_epsilon)
            .with_momentum(0.01)
            .init(device);

        Self {
            conv,
            bn,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.activation.forward(x)
    }
}

/// Sequence of conv2d_bn layers
#[derive(Module, Debug)]
pub struct ConvStack<B: Backend> {
    pub layers: Vec<ConvBn<B>>,
}

impl<B: Backend> ConvStack<B> {
    fn new(specs: &[ConvSpec], bn_epsilon: f64, device: &B::Device) -> Self {
        Self {
            layers: specs
                .iter()
                .map(|&spec| ConvBn::new(spec, bn_epsilon, device))
                .collect(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }
}

/// Scaled residual Inception block (block35, block17, block8)
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub branches: Vec<ConvStack<B>>,
    /// 1x1 projection back to the block input width, with bias
    pub up: Conv2d<B>,
    scale: f64,
    activation: Option<Relu>,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(
        branches: &[&[ConvSpec]],
        channels: usize,
        scale: f64,
        activate: bool,
        bn_epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let mixed: usize = branches
            .iter()
            .filter_map(|branch| branch.last().map(|spec| spec.channels[1]))
            .sum();

        Self {
            branches: branches
                .iter()
                .map(|specs| ConvStack::new(specs, bn_epsilon, device))
                .collect(),
            up: Conv2dConfig::new([mixed, channels], [1, 1]).init(device),
            scale,
            activation: activate.then(Relu::new),
        }
    }

    fn block35(scale: f64, bn_epsilon: f64, device: &B::Device) -> Self {
        Self::new(
            &[
                &[same(320, 32, [1, 1])],
                &[same(320, 32, [1, 1]), same(32, 32, [3, 3])],
                &[same(320, 32, [1, 1]), same(32, 48, [3, 3]), same(48, 64, [3, 3])],
            ],
            320,
            scale,
            true,
            bn_epsilon,
            device,
        )
    }

    fn block17(scale: f64, bn_epsilon: f64, device: &B::Device) -> Self {
        Self::new(
            &[
                &[same(1088, 192, [1, 1])],
                &[same(1088, 128, [1, 1]), same(128, 160, [1, 7]), same(160, 192, [7, 1])],
            ],
            1088,
            scale,
            true,
            bn_epsilon,
            device,
        )
    }

    fn block8(scale: f64, activate: bool, bn_epsilon: f64, device: &B::Device) -> Self {
        Self::new(
            &[
                &[same(2080, 192, [1, 1])],
                &[same(2080, 192, [1, 1]), same(192, 224, [1, 3]), same(224, 256, [3, 1])],
            ],
            2080,
            scale,
            activate,
            bn_epsilon,
            device,
        )
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mixed = Tensor::cat(
            self.branches
                .iter()
                .map(|branch| branch.forward(x.clone()))
                .collect(),
            1,
        );
        let up = self.up.forward(mixed);
        let x = x + up.mul_scalar(self.scale);

        match &self.activation {
            Some(activation) => activation.forward(x),
            None => x,
        }
    }
}

/// Mixed 5b: first Inception block after the stem (192 -> 320 channels)
#[derive(Module, Debug)]
pub struct Mixed5b<B: Backend> {
    pub branches: Vec<ConvStack<B>>,
    pool: AvgPool2d,
    pub pool_proj: ConvBn<B>,
}

impl<B: Backend> Mixed5b<B> {
    fn new(bn_epsilon: f64, device: &B::Device) -> Self {
        let specs: [&[ConvSpec]; 3] = [
            &[same(192, 96, [1, 1])],
            &[same(192, 48, [1, 1]), same(48, 64, [5, 5])],
            &[same(192, 64, [1, 1]), same(64, 96, [3, 3]), same(96, 96, [3, 3])],
        ];

        Self {
            branches: specs
                .iter()
                .map(|s| ConvStack::new(s, bn_epsilon, device))
                .collect(),
            pool: AvgPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Same)
                .with_count_include_pad(false)
                .init(),
            pool_proj: ConvBn::new(same(192, 64, [1, 1]), bn_epsilon, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut outputs: Vec<_> = self
            .branches
            .iter()
            .map(|branch| branch.forward(x.clone()))
            .collect();
        outputs.push(self.pool_proj.forward(self.pool.forward(x)));
        Tensor::cat(outputs, 1)
    }
}

/// Grid reduction block (mixed 6a, mixed 7a): stride-2 branches plus max-pool
#[derive(Module, Debug)]
pub struct Reduction<B: Backend> {
    pub branches: Vec<ConvStack<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> Reduction<B> {
    fn new(branches: &[&[ConvSpec]], bn_epsilon: f64, device: &B::Device) -> Self {
        Self {
            branches: branches
                .iter()
                .map(|specs| ConvStack::new(specs, bn_epsilon, device))
                .collect(),
            pool: MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init(),
        }
    }

    /// 320 -> 1088 channels
    fn mixed_6a(bn_epsilon: f64, device: &B::Device) -> Self {
        Self::new(
            &[
                &[valid(320, 384, 3, 2)],
                &[same(320, 256, [1, 1]), same(256, 256, [3, 3]), valid(256, 384, 3, 2)],
            ],
            bn_epsilon,
            device,
        )
    }

    /// 1088 -> 2080 channels
    fn mixed_7a(bn_epsilon: f64, device: &B::Device) -> Self {
        Self::new(
            &[
                &[same(1088, 256, [1, 1]), valid(256, 384, 3, 2)],
                &[same(1088, 256, [1, 1]), valid(256, 288, 3, 2)],
                &[same(1088, 256, [1, 1]), same(256, 288, [3, 3]), valid(288, 320, 3, 2)],
            ],
            bn_epsilon,
            device,
        )
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut outputs: Vec<_> = self
            .branches
            .iter()
            .map(|branch| branch.forward(x.clone()))
            .collect();
        outputs.push(self.pool.forward(x));
        Tensor::cat(outputs, 1)
    }
}

/// Inception-ResNet-v2 feature extractor without classification top
#[derive(Module, Debug)]
pub struct InceptionResNetV2<B: Backend> {
    pub stem_a: ConvStack<B>,
    stem_pool_a: MaxPool2d,
    pub stem_b: ConvStack<B>,
    stem_pool_b: MaxPool2d,
    pub mixed_5b: Mixed5b<B>,
    pub block35: Vec<ResidualBlock<B>>,
    pub mixed_6a: Reduction<B>,
    pub block17: Vec<ResidualBlock<B>>,
    pub mixed_7a: Reduction<B>,
    pub block8: Vec<ResidualBlock<B>>,
    pub block8_final: ResidualBlock<B>,
    pub conv_7b: ConvBn<B>,
}

impl<B: Backend> InceptionResNetV2<B> {
    pub fn new(config: &InceptionResNetV2Config, device: &B::Device) -> Self {
        let eps = config.bn_epsilon;

        let stem_a = ConvStack::new(
            &[valid(3, 32, 3, 2), valid(32, 32, 3, 1), same(32, 64, [3, 3])],
            eps,
            device,
        );
        let stem_b = ConvStack::new(&[valid(64, 80, 1, 1), valid(80, 192, 3, 1)], eps, device);

        Self {
            stem_a,
            stem_pool_a: MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init(),
            stem_b,
            stem_pool_b: MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init(),
            mixed_5b: Mixed5b::new(eps, device),
            block35: (0..config.block35_repeats)
                .map(|_| ResidualBlock::block35(0.17, eps, device))
                .collect(),
            mixed_6a: Reduction::mixed_6a(eps, device),
            block17: (0..config.block17_repeats)
                .map(|_| ResidualBlock::block17(0.1, eps, device))
                .collect(),
            mixed_7a: Reduction::mixed_7a(eps, device),
            block8: (0..config.block8_repeats)
                .map(|_| ResidualBlock::block8(0.2, true, eps, device))
                .collect(),
            block8_final: ResidualBlock::block8(1.0, false, eps, device),
            conv_7b: ConvBn::new(same(2080, BACKBONE_CHANNELS, [1, 1]), eps, device),
        }
    }

    /// `[N, 3, H, W]` -> `[N, 1536, h, w]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem_pool_a.forward(self.stem_a.forward(input));
        let x = self.stem_pool_b.forward(self.stem_b.forward(x));

        let x = self.mixed_5b.forward(x);
        let x = self.block35.iter().fold(x, |x, block| block.forward(x));
        let x = self.mixed_6a.forward(x);
        let x = self.block17.iter().fold(x, |x, block| block.forward(x));
        let x = self.mixed_7a.forward(x);
        let x = self.block8.iter().fold(x, |x, block| block.forward(x));
        let x = self.block8_final.forward(x);

        self.conv_7b.forward(x)
    }
}

/// Backbone, global average pooling, dense(500, relu), dense(num_classes)
#[derive(Module, Debug)]
pub struct TumorClassifier<B: Backend> {
    pub backbone: InceptionResNetV2<B>,
    global_pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    activation: Relu,
    pub fc2: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> TumorClassifier<B> {
    pub fn new(config: &TumorClassifierConfig, device: &B::Device) -> Self {
        Self {
            backbone: InceptionResNetV2::new(&config.backbone, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(BACKBONE_CHANNELS, config.hidden_units).init(device),
            activation: Relu::new(),
            fc2: LinearConfig::new(config.hidden_units, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Class logits `[N, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(input);
        let pooled = self.global_pool.forward(features).flatten::<2>(1, 3);
        let hidden = self.activation.forward(self.fc1.forward(pooled));
        self.fc2.forward(hidden)
    }

    /// Class probabilities (softmax output layer)
    pub fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(input), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> TumorClassifierConfig {
        TumorClassifierConfig::new(
            InceptionResNetV2Config::new()
                .with_block35_repeats(1)
                .with_block17_repeats(1)
                .with_block8_repeats(0),
        )
        .with_hidden_units(8)
        .with_input_size(75)
    }

    #[test]
    fn test_default_config_matches_keras_layout() {
        let config = TumorClassifierConfig::new(InceptionResNetV2Config::new());
        assert_eq!(config.backbone.block35_repeats, 10);
        assert_eq!(config.backbone.block17_repeats, 20);
        assert_eq!(config.backbone.block8_repeats, 9);
        assert_eq!(config.hidden_units, 500);
        assert_eq!(config.num_classes, 2);
        assert_eq!(config.input_size, 256);
    }

    #[test]
    fn test_residual_block_preserves_shape() {
        let device = Default::default();
        let block = ResidualBlock::<TestBackend>::block35(0.17, 1e-3, &device);
        let x = Tensor::<TestBackend, 4>::ones([1, 320, 5, 5], &device);
        assert_eq!(block.forward(x).dims(), [1, 320, 5, 5]);
    }

    #[test]
    fn test_reduction_channels() {
        let device = Default::default();
        let block = Reduction::<TestBackend>::mixed_6a(1e-3, &device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 320, 9, 9], &device);
        assert_eq!(block.forward(x).dims(), [1, 1088, 4, 4]);
    }

    #[test]
    fn test_mixed_5b_channels() {
        let device = Default::default();
        let block = Mixed5b::<TestBackend>::new(1e-3, &device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 192, 7, 7], &device);
        assert_eq!(block.forward(x).dims(), [2, 320, 7, 7]);
    }

    #[test]
    fn test_classifier_output_shape() {
        let device = Default::default();
        let config = tiny_config();
        let model = TumorClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 75, 75], &device);
        let logits = model.forward(input.clone());
        assert_eq!(logits.dims(), [2, 2]);

        let probs = model.predict(input);
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_repeats_change_parameter_count() {
        let device = Default::default();
        let small = TumorClassifier::<TestBackend>::new(&tiny_config(), &device);
        let mut larger_config = tiny_config();
        larger_config.backbone.block35_repeats = 2;
        let larger = TumorClassifier::<TestBackend>::new(&larger_config, &device);
        assert!(larger.num_params() > small.num_params());
    }
}
