use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::norm::{LayerWalk, Norm2d, NormToggle};
use super::Segmenter;
use crate::config::InputSize;
use crate::error::ConfigError;

#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Input image channels.
    #[config(default = "3")]
    pub in_channels: usize,

    /// Output channels of the prediction map.
    #[config(default = "1")]
    pub num_classes: usize,

    /// Filters of the first encoder stage; doubled at every stage below it.
    #[config(default = "32")]
    pub base_filters: usize,

    /// Number of down-sampling stages.
    #[config(default = "4")]
    pub depth: usize,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        UNet::new(self, device)
    }

    /// Inputs must survive `depth` halvings without rounding.
    pub fn check_input(&self, size: InputSize) -> Result<(), ConfigError> {
        let factor = 1usize << self.depth;
        if size.height % factor != 0 || size.width % factor != 0 {
            return Err(ConfigError::IndivisibleInput {
                height: size.height,
                width: size.width,
                factor,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

/// Two 3x3 convolutions, each followed by normalisation and ReLU.
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: Norm2d<B>,
    conv2: Conv2d<B>,
    norm2: Norm2d<B>,
    activation: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |input| {
            Conv2dConfig::new([input, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv(in_channels),
            norm1: Norm2d::new(out_channels, device),
            conv2: conv(out_channels),
            norm2: Norm2d::new(out_channels, device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.norm1.forward(self.conv1.forward(x)));
        self.activation.forward(self.norm2.forward(self.conv2.forward(x)))
    }
}

impl<B: Backend> LayerWalk for DoubleConv<B> {
    fn walk_layers(&mut self, visit: &mut dyn FnMut(&mut dyn NormToggle)) {
        visit(&mut self.conv1);
        visit(&mut self.norm1);
        visit(&mut self.conv2);
        visit(&mut self.norm2);
        visit(&mut self.activation);
    }
}

/// Encoder/decoder segmentation network with skip connections.
///
/// Input `[N, in_channels, H, W]`, output `[N, num_classes, H, W]`; `H` and `W`
/// must be divisible by `2^depth` (see [`UNetConfig::check_input`]).
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoder: Vec<DoubleConv<B>>,
    pool: MaxPool2d,
    bottleneck: DoubleConv<B>,
    upsample: Vec<ConvTranspose2d<B>>,
    decoder: Vec<DoubleConv<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> UNet<B> {
    pub fn new(config: &UNetConfig, device: &B::Device) -> Self {
        let widths: Vec<usize> = (0..=config.depth)
            .map(|stage| config.base_filters << stage)
            .collect();

        let mut encoder = Vec::with_capacity(config.depth);
        let mut channels = config.in_channels;
        for &width in &widths[..config.depth] {
            encoder.push(DoubleConv::new(channels, width, device));
            channels = width;
        }
        let bottleneck = DoubleConv::new(channels, widths[config.depth], device);

        // Decoder stages run from the deepest level back up.
        let mut upsample = Vec::with_capacity(config.depth);
        let mut decoder = Vec::with_capacity(config.depth);
        for stage in (0..config.depth).rev() {
            let (below, here) = (widths[stage + 1], widths[stage]);
            upsample.push(
                ConvTranspose2dConfig::new([below, here], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            decoder.push(DoubleConv::new(here * 2, here, device));
        }

        let head = Conv2dConfig::new([widths[0], config.num_classes], [1, 1]).init(device);

        Self {
            encoder,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            upsample,
            decoder,
            head,
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut x = images;
        for block in &self.encoder {
            x = block.forward(x);
            skips.push(x.clone());
            x = self.pool.forward(x);
        }

        x = self.bottleneck.forward(x);

        for ((up, block), skip) in self
            .upsample
            .iter()
            .zip(&self.decoder)
            .zip(skips.into_iter().rev())
        {
            x = up.forward(x);
            x = block.forward(Tensor::cat(vec![skip, x], 1));
        }

        self.head.forward(x)
    }
}

impl<B: Backend> Segmenter<B> for UNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        UNet::forward(self, images)
    }
}

impl<B: Backend> LayerWalk for UNet<B> {
    fn walk_layers(&mut self, visit: &mut dyn FnMut(&mut dyn NormToggle)) {
        for block in &mut self.encoder {
            block.walk_layers(visit);
        }
        visit(&mut self.pool);
        self.bottleneck.walk_layers(visit);
        for (up, block) in self.upsample.iter_mut().zip(&mut self.decoder) {
            visit(up);
            block.walk_layers(visit);
        }
        visit(&mut self.head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::set_bn_eval;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small() -> UNetConfig {
        UNetConfig::new().with_base_filters(4).with_depth(2)
    }

    #[test]
    fn prediction_matches_input_resolution() {
        let device = Default::default();
        let model = small().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 8], &device);
        assert_eq!(model.forward(images).dims(), [2, 1, 16, 8]);
    }

    #[test]
    fn every_stage_has_two_norm_layers() {
        let device = Default::default();
        let mut model = small().init::<TestBackend>(&device);
        // 2 encoder + bottleneck + 2 decoder stages.
        assert_eq!(set_bn_eval(&mut model), 10);
    }

    #[test]
    fn input_must_divide_by_depth() {
        let config = small();
        assert!(config.check_input(InputSize::new(512, 512)).is_ok());
        assert_eq!(
            config.check_input(InputSize::new(30, 32)),
            Err(ConfigError::IndivisibleInput {
                height: 30,
                width: 32,
                factor: 4,
                depth: 2,
            })
        );
    }
}
