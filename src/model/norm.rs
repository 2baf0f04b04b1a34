use burn::module::Module;
use burn::nn::conv::{Conv2d, ConvTranspose2d};
use burn::nn::pool::MaxPool2d;
use burn::nn::{BatchNorm, BatchNormConfig, Relu};
use burn::tensor::{backend::Backend, Tensor};

/// Capability check for layers whose normalisation behaviour can be switched.
///
/// Only normalisation layers answer `true`; every other layer keeps the no-op
/// defaults.
pub trait NormToggle {
    fn supports_bn_toggle(&self) -> bool {
        false
    }

    /// Stop updating running statistics and normalise with them instead.
    fn set_eval(&mut self) {}

    fn set_momentum(&mut self, _momentum: f64) {}
}

/// Models that can hand each of their layers to a visitor.
pub trait LayerWalk {
    fn walk_layers(&mut self, visit: &mut dyn FnMut(&mut dyn NormToggle));
}

/// Freezes every normalisation layer of `model`. Returns how many were switched.
pub fn set_bn_eval<M: LayerWalk>(model: &mut M) -> usize {
    let mut switched = 0;
    model.walk_layers(&mut |layer| {
        if layer.supports_bn_toggle() {
            layer.set_eval();
            switched += 1;
        }
    });
    switched
}

/// Sets the running-statistics momentum of every normalisation layer of `model`.
pub fn set_bn_momentum<M: LayerWalk>(model: &mut M, momentum: f64) -> usize {
    let mut updated = 0;
    model.walk_layers(&mut |layer| {
        if layer.supports_bn_toggle() {
            layer.set_momentum(momentum);
            updated += 1;
        }
    });
    updated
}

/// Batch normalisation over `[N, C, H, W]` that can be frozen to its running statistics.
#[derive(Module, Debug)]
pub struct Norm2d<B: Backend> {
    bn: BatchNorm<B>,
    #[module(skip)]
    frozen: bool,
}

impl<B: Backend> Norm2d<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            bn: BatchNormConfig::new(channels).init(device),
            frozen: false,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn momentum(&self) -> f64 {
        self.bn.momentum
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !self.frozen {
            return self.bn.forward(x);
        }

        let channels = x.dims()[1];
        let shape = [1, channels, 1, 1];
        let mean = self.bn.running_mean.value().reshape(shape);
        let var = self.bn.running_var.value().reshape(shape);
        let gamma = self.bn.gamma.val().reshape(shape);
        let beta = self.bn.beta.val().reshape(shape);

        x.sub(mean)
            .div(var.add_scalar(self.bn.epsilon).sqrt())
            .mul(gamma)
            .add(beta)
    }
}

impl<B: Backend> NormToggle for Norm2d<B> {
    fn supports_bn_toggle(&self) -> bool {
        true
    }

    fn set_eval(&mut self) {
        self.frozen = true;
    }

    fn set_momentum(&mut self, momentum: f64) {
        self.bn.momentum = momentum;
    }
}

impl<B: Backend> NormToggle for Conv2d<B> {}
impl<B: Backend> NormToggle for ConvTranspose2d<B> {}
impl NormToggle for MaxPool2d {}
impl NormToggle for Relu {}
