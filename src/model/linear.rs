use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::tensor::{backend::Backend, Tensor};

use super::norm::{LayerWalk, NormToggle};
use super::Segmenter;

/// Per-pixel affine map (a 1x1 convolution). Useful as a baseline and for
/// exercising the training loop on a convex objective.
#[derive(Module, Debug)]
pub struct PixelLinear<B: Backend> {
    proj: Conv2d<B>,
}

impl<B: Backend> PixelLinear<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            proj: Conv2dConfig::new([in_channels, out_channels], [1, 1]).init(device),
        }
    }
}

impl<B: Backend> Segmenter<B> for PixelLinear<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.proj.forward(images)
    }
}

impl<B: Backend> LayerWalk for PixelLinear<B> {
    fn walk_layers(&mut self, visit: &mut dyn FnMut(&mut dyn NormToggle)) {
        visit(&mut self.proj);
    }
}
