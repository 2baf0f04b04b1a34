// Library exports for the training binary and the integration tests

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod model;
pub mod training;

// Re-export commonly used types
pub use config::{InputSize, TrainArgs, TrainingConfig};
pub use error::{ConfigError, DataError, TrainError};
pub use model::{PixelLinear, Segmenter, UNet, UNetConfig};
pub use training::{Trainer, TrainingReport, TrainingState};
