use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xlsor::checkpoint::{self, CheckpointWriter};
use xlsor::data::{build_loader, XrayDataset};
use xlsor::device::{select_device, TrainBackend};
use xlsor::model::{set_bn_eval, set_bn_momentum, UNet, UNetConfig};
use xlsor::training::{adam, Trainer};
use xlsor::{TrainArgs, TrainingConfig};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = TrainArgs::parse()
        .into_config()
        .context("Invalid training configuration")?;

    train_command(config)
}

fn train_command(config: TrainingConfig) -> Result<()> {
    info!("Configuration: {}", config);

    let model_config = UNetConfig::new().with_num_classes(config.num_classes);
    model_config
        .check_input(config.input_size)
        .context("Invalid input size")?;

    let device = select_device(config.visible_devices());

    let checkpoints = CheckpointWriter::create(&config.snapshot_dir)?;
    let existing = checkpoint::list_checkpoints(checkpoints.dir())?;
    if !existing.is_empty() {
        warn!(
            "{} snapshots from an earlier run already in {:?}; new ones are added alongside",
            existing.len(),
            checkpoints.dir()
        );
    }
    checkpoint::write_json(&config.snapshot_dir.join("config.json"), &config)?;

    let dataset = XrayDataset::from_config(&config).context("Failed to prepare the training data")?;
    let loader = build_loader::<TrainBackend, _>(dataset, &config, device.clone());

    info!("Initializing U-Net...");
    let mut model = model_config.init::<TrainBackend>(&device);
    if let Some(path) = &config.restore_from {
        model = checkpoint::restore(model, path, &device)
            .with_context(|| format!("Failed to restore from {:?}", path))?;
    }
    if config.freeze_bn {
        let frozen = set_bn_eval(&mut model);
        info!("Froze {} batch-norm layers", frozen);
    }
    if let Some(momentum) = config.bn_momentum {
        let updated = set_bn_momentum(&mut model, momentum);
        info!("Set momentum {} on {} batch-norm layers", momentum, updated);
    }

    let mut trainer = Trainer::new(
        model,
        adam::<TrainBackend, UNet<TrainBackend>>(),
        checkpoints,
        &config,
    );
    let report = trainer.fit(loader.iter())?;

    info!(
        "Ran {} iterations, wrote {} checkpoints, best loss {:?}",
        report.iterations,
        report.checkpoints.len(),
        report.best_loss
    );
    checkpoint::write_json(&config.snapshot_dir.join("summary.json"), &report)?;

    Ok(())
}
