use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::{backend::AutodiffBackend, Tensor};
use serde::Serialize;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use super::scheduler::PolyLr;
use crate::checkpoint::{CheckpointRecord, CheckpointWriter};
use crate::config::TrainingConfig;
use crate::data::XrayBatch;
use crate::error::TrainError;
use crate::model::Segmenter;

/// Mutable loop context, threaded through every iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingState {
    /// Lowest loss seen so far. Starts above any real loss.
    pub best_loss: f32,
    /// Index of the next iteration, offset by `start_iters`.
    pub step: usize,
}

impl TrainingState {
    pub fn new(start_iters: usize) -> Self {
        Self {
            best_loss: f32::INFINITY,
            step: start_iters,
        }
    }

    /// Records `loss` and reports whether it ties or beats the best so far.
    /// Non-finite losses never improve.
    pub fn improve(&mut self, loss: f32) -> bool {
        if loss.is_finite() && loss <= self.best_loss {
            self.best_loss = loss;
            true
        } else {
            false
        }
    }
}

/// What one iteration produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub iteration: usize,
    pub lr: f64,
    pub loss: f32,
    pub checkpoint: Option<CheckpointRecord>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub start_iter: usize,
    pub iterations: usize,
    pub losses: Vec<f32>,
    pub checkpoints: Vec<PathBuf>,
    pub best_loss: Option<f32>,
    pub elapsed_secs: f64,
}

/// Adam with default hyperparameters, the optimizer `xlsor-train` uses.
pub fn adam<B: AutodiffBackend, M: AutodiffModule<B>>() -> impl Optimizer<M, B> {
    AdamConfig::new().init::<B, M>()
}

/// SGD with the configured momentum and weight decay.
pub fn sgd<B: AutodiffBackend, M: AutodiffModule<B>>(config: &TrainingConfig) -> impl Optimizer<M, B> {
    let momentum = (config.momentum > 0.0).then(|| MomentumConfig {
        momentum: config.momentum,
        dampening: 0.0,
        nesterov: false,
    });
    let weight_decay =
        (config.weight_decay > 0.0).then(|| WeightDecayConfig::new(config.weight_decay as f32));

    SgdConfig::new()
        .with_momentum(momentum)
        .with_weight_decay(weight_decay)
        .init::<B, M>()
}

/// Drives forward, MSE loss, backward and the optimizer step, one batch at a time.
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: Segmenter<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    model: M,
    optimizer: O,
    loss_fn: MseLoss,
    schedule: PolyLr,
    checkpoints: CheckpointWriter,
    batch_size: usize,
    num_steps: usize,
    state: TrainingState,
    _backend: PhantomData<B>,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: Segmenter<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(model: M, optimizer: O, checkpoints: CheckpointWriter, config: &TrainingConfig) -> Self {
        Self {
            model,
            optimizer,
            loss_fn: MseLoss::new(),
            schedule: PolyLr::new(config.learning_rate, config.num_steps, config.power),
            checkpoints,
            batch_size: config.batch_size,
            num_steps: config.num_steps,
            state: TrainingState::new(config.start_iters),
            _backend: PhantomData,
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.step >= self.num_steps
    }

    /// One iteration: schedule, batch check, forward, loss, backward, optimizer step, log,
    /// and a checkpoint when the loss ties or beats the best so far.
    pub fn step(&mut self, batch: XrayBatch<B>) -> Result<StepOutput, TrainError> {
        let iteration = self.state.step;
        let lr = self.schedule.lr(iteration);

        if batch.names.len() != self.batch_size {
            return Err(TrainError::IncompleteBatch {
                iteration,
                expected: self.batch_size,
                actual: batch.names.len(),
            });
        }

        let prediction = self.model.forward(batch.images);
        let (prediction_dims, label_dims) = (prediction.dims(), batch.labels.dims());
        if prediction_dims != label_dims {
            return Err(TrainError::ShapeMismatch {
                prediction: prediction_dims,
                label: label_dims,
            });
        }

        let loss = self.loss_fn.forward(prediction, batch.labels, Reduction::Mean);
        let loss_value = scalar(loss.clone().detach())?;

        // Gradients are rebuilt from scratch by every backward pass, so there is
        // nothing to zero between iterations.
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(lr, self.model.clone(), grads);

        info!(
            "iter = {} of {} completed, loss = {}",
            iteration, self.num_steps, loss_value
        );
        debug!("lr = {:.8}, samples = {:?}", lr, batch.names);

        let checkpoint = if self.state.improve(loss_value) {
            Some(
                self.checkpoints
                    .save::<B, M>(&self.model, iteration, loss_value)
                    .map_err(TrainError::Checkpoint)?,
            )
        } else {
            None
        };

        self.state.step += 1;

        Ok(StepOutput {
            iteration,
            lr,
            loss: loss_value,
            checkpoint,
        })
    }

    /// Runs until iteration `num_steps - 1` has been processed. Any fault aborts
    /// the run; running out of batches early is a fault too.
    pub fn fit<I>(&mut self, batches: I) -> Result<TrainingReport, TrainError>
    where
        I: IntoIterator<Item = XrayBatch<B>>,
    {
        let started = Instant::now();
        let mut report = TrainingReport {
            start_iter: self.state.step,
            ..TrainingReport::default()
        };

        info!(
            "Starting training at iteration {} of {} ({})",
            self.state.step,
            self.num_steps,
            self.schedule.description()
        );

        let mut batches = batches.into_iter();
        while !self.is_finished() {
            let Some(batch) = batches.next() else {
                return Err(TrainError::DataExhausted {
                    iteration: self.state.step,
                    num_steps: self.num_steps,
                });
            };

            let output = self.step(batch)?;
            report.iterations += 1;
            report.losses.push(output.loss);
            if let Some(checkpoint) = output.checkpoint {
                report.checkpoints.push(checkpoint.path);
            }
        }

        report.best_loss = self.state.best_loss.is_finite().then_some(self.state.best_loss);
        report.elapsed_secs = started.elapsed().as_secs_f64();

        info!("finished ...");
        info!("{} seconds", report.elapsed_secs);

        Ok(report)
    }
}

fn scalar<B: AutodiffBackend>(loss: Tensor<B, 1>) -> Result<f32, TrainError> {
    let values = loss
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Readback(format!("{e:?}")))?;
    values
        .first()
        .copied()
        .ok_or_else(|| TrainError::Readback("empty loss tensor".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tracks_non_increasing_losses() {
        let mut state = TrainingState::new(5);
        assert_eq!(state.step, 5);
        assert!(state.improve(1.0));
        assert!(state.improve(1.0));
        assert!(!state.improve(1.5));
        assert!(state.improve(0.5));
        assert!(!state.improve(f32::NAN));
        assert_eq!(state.best_loss, 0.5);
    }

    #[test]
    fn diverged_first_loss_is_not_an_improvement() {
        let mut state = TrainingState::new(0);
        assert!(!state.improve(f32::INFINITY));
        assert_eq!(state.best_loss, f32::INFINITY);
        assert!(state.improve(3.0));
    }
}
