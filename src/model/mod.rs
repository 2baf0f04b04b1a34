pub mod linear;
pub mod norm;
pub mod unet;

use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

pub use linear::PixelLinear;
pub use norm::{set_bn_eval, set_bn_momentum, LayerWalk, Norm2d, NormToggle};
pub use unet::{DoubleConv, UNet, UNetConfig};

/// The forward half of the compute collaborator: images in, per-pixel prediction out.
pub trait Segmenter<B: Backend>: Module<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}
