use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Per-channel mean (BGR order) subtracted from every input image.
pub const IMG_MEAN: [f32; 3] = [104.006_99, 116.668_77, 122.678_92];

pub const BATCH_SIZE: usize = 8;
pub const DATA_DIRECTORY: &str = "./data";
pub const DATA_LIST_PATH: &str = "./data/train.txt";
pub const IGNORE_LABEL: u8 = 0;
pub const INPUT_SIZE: &str = "512,512";
pub const LEARNING_RATE: f64 = 1e-2;
pub const MOMENTUM: f64 = 0.9;
pub const NUM_CLASSES: usize = 1;
pub const NUM_STEPS: usize = 10_000;
pub const POWER: f64 = 0.9;
pub const RANDOM_SEED: u64 = 1234;
pub const SAVE_NUM_IMAGES: usize = 2;
pub const SAVE_PRED_EVERY: usize = 250;
pub const SNAPSHOT_DIR: &str = "./snapshot/";
pub const WEIGHT_DECAY: f64 = 5e-4;
pub const GPU: &str = "0,1,2,3";
pub const RECURRENCE: usize = 2;
pub const NUM_WORKERS: usize = 16;

/// Crop size fed to the network, parsed from `"H,W"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSize {
    pub height: usize,
    pub width: usize,
}

impl InputSize {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

impl FromStr for InputSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::InputSize(s.to_string());
        let (h, w) = s.split_once(',').ok_or_else(malformed)?;
        let height: usize = h.trim().parse().map_err(|_| malformed())?;
        let width: usize = w.trim().parse().map_err(|_| malformed())?;
        if height == 0 || width == 0 {
            return Err(malformed());
        }
        Ok(Self { height, width })
    }
}

impl fmt::Display for InputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.height, self.width)
    }
}

/// Command-line flags of `xlsor-train`.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "XLSor Network")]
pub struct TrainArgs {
    /// Number of images sent to the network in one step.
    #[arg(long, default_value_t = BATCH_SIZE)]
    pub batch_size: usize,
    /// Directory the data list paths are relative to.
    #[arg(long, default_value = DATA_DIRECTORY)]
    pub data_dir: PathBuf,
    /// File listing "<image> <label>" pairs, one per line.
    #[arg(long, default_value = DATA_LIST_PATH)]
    pub data_list: PathBuf,
    /// Label value used to pad labels after random scaling.
    #[arg(long, default_value_t = IGNORE_LABEL)]
    pub ignore_label: u8,
    /// Comma-separated height and width of the training crops.
    #[arg(long, default_value = INPUT_SIZE)]
    pub input_size: InputSize,
    /// Whether to update the running means and variances during training.
    #[arg(long)]
    pub is_training: bool,
    /// Base learning rate for polynomial decay.
    #[arg(long, default_value_t = LEARNING_RATE)]
    pub learning_rate: f64,
    /// Momentum component of the SGD optimiser.
    #[arg(long, default_value_t = MOMENTUM)]
    pub momentum: f64,
    /// Whether to not restore the last layers.
    #[arg(long)]
    pub not_restore_last: bool,
    /// Number of output channels of the network.
    #[arg(long, default_value_t = NUM_CLASSES)]
    pub num_classes: usize,
    /// Iteration index the run starts from.
    #[arg(long, default_value_t = 0)]
    pub start_iters: usize,
    /// Number of training steps.
    #[arg(long, default_value_t = NUM_STEPS)]
    pub num_steps: usize,
    /// Decay exponent of the learning-rate schedule.
    #[arg(long, default_value_t = POWER)]
    pub power: f64,
    /// Randomly mirror the inputs during training.
    #[arg(long)]
    pub random_mirror: bool,
    /// Randomly scale the inputs during training.
    #[arg(long)]
    pub random_scale: bool,
    /// Seed for shuffling and augmentation.
    #[arg(long, default_value_t = RANDOM_SEED)]
    pub random_seed: u64,
    /// Checkpoint to restore model parameters from.
    #[arg(long)]
    pub restore_from: Option<PathBuf>,
    /// How many images to save.
    #[arg(long, default_value_t = SAVE_NUM_IMAGES)]
    pub save_num_images: usize,
    /// Save summaries every this many steps.
    #[arg(long, default_value_t = SAVE_PRED_EVERY)]
    pub save_pred_every: usize,
    /// Where to save snapshots of the model.
    #[arg(long, default_value = SNAPSHOT_DIR)]
    pub snapshot_dir: PathBuf,
    /// Regularisation parameter for the L2 penalty.
    #[arg(long, default_value_t = WEIGHT_DECAY)]
    pub weight_decay: f64,
    /// Visible accelerator devices, or "None".
    #[arg(long, default_value = GPU)]
    pub gpu: String,
    /// Number of recurrences.
    #[arg(long, default_value_t = RECURRENCE)]
    pub recurrence: usize,
    /// Fine-tune the model with a large input size.
    #[arg(long)]
    pub ft: bool,
    /// Background threads preparing batches (0 loads on the training thread).
    #[arg(long, default_value_t = NUM_WORKERS)]
    pub num_workers: usize,
    /// Freeze batch-norm statistics before training.
    #[arg(long)]
    pub freeze_bn: bool,
    /// Override the running-statistics momentum of every batch-norm layer.
    #[arg(long)]
    pub bn_momentum: Option<f64>,
}

impl TrainArgs {
    pub fn into_config(self) -> Result<TrainingConfig, ConfigError> {
        let config = TrainingConfig {
            batch_size: self.batch_size,
            data_dir: self.data_dir,
            data_list: self.data_list,
            ignore_label: self.ignore_label,
            input_size: self.input_size,
            is_training: self.is_training,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            not_restore_last: self.not_restore_last,
            num_classes: self.num_classes,
            start_iters: self.start_iters,
            num_steps: self.num_steps,
            power: self.power,
            random_mirror: self.random_mirror,
            random_scale: self.random_scale,
            random_seed: self.random_seed,
            restore_from: self.restore_from,
            save_num_images: self.save_num_images,
            save_pred_every: self.save_pred_every,
            snapshot_dir: self.snapshot_dir,
            weight_decay: self.weight_decay,
            gpu: self.gpu,
            recurrence: self.recurrence,
            ft: self.ft,
            num_workers: self.num_workers,
            freeze_bn: self.freeze_bn,
            bn_momentum: self.bn_momentum,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Hyperparameters of one training run. Built once at start-up, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub data_dir: PathBuf,
    pub data_list: PathBuf,
    pub ignore_label: u8,
    pub input_size: InputSize,
    pub is_training: bool,
    pub learning_rate: f64,
    pub momentum: f64,
    pub not_restore_last: bool,
    pub num_classes: usize,
    pub start_iters: usize,
    pub num_steps: usize,
    pub power: f64,
    pub random_mirror: bool,
    pub random_scale: bool,
    pub random_seed: u64,
    pub restore_from: Option<PathBuf>,
    pub save_num_images: usize,
    pub save_pred_every: usize,
    pub snapshot_dir: PathBuf,
    pub weight_decay: f64,
    pub gpu: String,
    pub recurrence: usize,
    pub ft: bool,
    pub num_workers: usize,
    pub freeze_bn: bool,
    pub bn_momentum: Option<f64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            data_dir: PathBuf::from(DATA_DIRECTORY),
            data_list: PathBuf::from(DATA_LIST_PATH),
            ignore_label: IGNORE_LABEL,
            input_size: InputSize::new(512, 512),
            is_training: false,
            learning_rate: LEARNING_RATE,
            momentum: MOMENTUM,
            not_restore_last: false,
            num_classes: NUM_CLASSES,
            start_iters: 0,
            num_steps: NUM_STEPS,
            power: POWER,
            random_mirror: false,
            random_scale: false,
            random_seed: RANDOM_SEED,
            restore_from: None,
            save_num_images: SAVE_NUM_IMAGES,
            save_pred_every: SAVE_PRED_EVERY,
            snapshot_dir: PathBuf::from(SNAPSHOT_DIR),
            weight_decay: WEIGHT_DECAY,
            gpu: GPU.to_string(),
            recurrence: RECURRENCE,
            ft: false,
            num_workers: NUM_WORKERS,
            freeze_bn: false,
            bn_momentum: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::NonPositive("batch_size"));
        }
        if self.num_classes != 1 {
            return Err(ConfigError::UnsupportedClasses(self.num_classes));
        }
        if self.input_size.height == 0 || self.input_size.width == 0 {
            return Err(ConfigError::InputSize(self.input_size.to_string()));
        }
        Ok(())
    }

    /// Number of samples the dataset is expanded to.
    pub fn max_iters(&self) -> usize {
        self.num_steps * self.batch_size
    }

    /// Device list to expose through `CUDA_VISIBLE_DEVICES`, if any.
    pub fn visible_devices(&self) -> Option<&str> {
        match self.gpu.trim() {
            "" | "None" => None,
            devices => Some(devices),
        }
    }
}

impl fmt::Display for TrainingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_size={} input_size={} lr={} power={} num_steps={} start_iters={} snapshot_dir={:?}",
            self.batch_size,
            self.input_size,
            self.learning_rate,
            self.power,
            self.num_steps,
            self.start_iters,
            self.snapshot_dir,
        )
    }
}
