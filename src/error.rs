use std::path::PathBuf;

use thiserror::Error;

/// Raised while turning command-line flags into a [`TrainingConfig`](crate::TrainingConfig).
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("input size must look like \"H,W\" with positive integers, got {0:?}")]
    InputSize(String),

    #[error("{0} must be > 0")]
    NonPositive(&'static str),

    #[error("labels are single-plane masks, so num_classes must be 1 (got {0})")]
    UnsupportedClasses(usize),

    #[error("input size {height}x{width} is not divisible by {factor} (U-Net depth {depth})")]
    IndivisibleInput {
        height: usize,
        width: usize,
        factor: usize,
        depth: usize,
    },
}

/// Failures of the dataset adapter.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("data directory {0:?} does not exist")]
    MissingDir(PathBuf),

    #[error("failed to read data list {path:?}")]
    ListRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}:{line}: expected \"<image> <label>\"")]
    MalformedLine { path: PathBuf, line: usize },

    #[error("data list {0:?} lists no samples")]
    Empty(PathBuf),

    #[error("listed file {0:?} does not exist")]
    MissingFile(PathBuf),

    #[error("failed to decode image {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Fatal faults raised from inside the training loop.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("prediction shape {prediction:?} does not match label shape {label:?}")]
    ShapeMismatch {
        prediction: [usize; 4],
        label: [usize; 4],
    },

    #[error("failed to read loss value back from the device: {0}")]
    Readback(String),

    #[error("batch at iteration {iteration} holds {actual} samples, expected {expected}; a sample failed to load")]
    IncompleteBatch {
        iteration: usize,
        expected: usize,
        actual: usize,
    },

    #[error("data loader ran dry at iteration {iteration} of {num_steps}")]
    DataExhausted { iteration: usize, num_steps: usize },

    #[error("failed to write checkpoint")]
    Checkpoint(#[source] anyhow::Error),
}
