mod scheduler;
mod trainer;

pub use scheduler::{lr_poly, PolyLr};
pub use trainer::{adam, sgd, StepOutput, Trainer, TrainingReport, TrainingState};
