//! Compute backend selection.
//!
//! NdArray (CPU) by default; `wgpu-backend` or `tch-backend` switch to an
//! accelerator.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use tracing::info;

#[cfg(feature = "tch-backend")]
pub type ComputeBackend = burn_tch::LibTorch<f32>;
#[cfg(all(feature = "wgpu-backend", not(feature = "tch-backend")))]
pub type ComputeBackend = burn_wgpu::Wgpu;
#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
pub type ComputeBackend = burn_ndarray::NdArray<f32>;

/// Backend the training loop runs on.
pub type TrainBackend = Autodiff<ComputeBackend>;

pub type TrainDevice = <TrainBackend as Backend>::Device;

pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Narrows the visible accelerators to `visible` (if any) and returns the
/// first device of the compiled backend.
pub fn select_device(visible: Option<&str>) -> TrainDevice {
    if let Some(devices) = visible {
        std::env::set_var(VISIBLE_DEVICES_VAR, devices);
        info!("{}={}", VISIBLE_DEVICES_VAR, devices);
    }
    first_device(visible.is_some())
}

#[cfg(feature = "tch-backend")]
fn first_device(accelerated: bool) -> TrainDevice {
    if accelerated {
        burn_tch::LibTorchDevice::Cuda(0)
    } else {
        burn_tch::LibTorchDevice::Cpu
    }
}

#[cfg(not(feature = "tch-backend"))]
fn first_device(accelerated: bool) -> TrainDevice {
    if accelerated && cfg!(not(feature = "wgpu-backend")) {
        tracing::debug!("Built without an accelerator backend; training on the CPU");
    }
    Default::default()
}
