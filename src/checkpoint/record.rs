use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const CHECKPOINT_PREFIX: &str = "unet";
const CHECKPOINT_EXTENSION: &str = "mpk";

type SnapshotRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A parameter snapshot on disk, keyed by iteration and loss.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointRecord {
    pub iteration: usize,
    pub loss: f32,
    pub path: PathBuf,
}

/// Writes `unet__<iteration>_<loss>.mpk` snapshots into one directory.
///
/// Superseded snapshots are never deleted.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
}

impl CheckpointWriter {
    /// Creates the snapshot directory if it doesn't exist.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, iteration: usize, loss: f32) -> PathBuf {
        // The extension is spelled out so the recorder never mistakes the
        // decimal point of the loss for one.
        self.dir.join(format!(
            "{}__{}_{}.{}",
            CHECKPOINT_PREFIX, iteration, loss, CHECKPOINT_EXTENSION
        ))
    }

    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        iteration: usize,
        loss: f32,
    ) -> Result<CheckpointRecord> {
        let path = self.path_for(iteration, loss);
        model
            .clone()
            .save_file(path.clone(), &SnapshotRecorder::new())
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint {:?}: {e}", path))?;

        info!("Checkpoint saved at iteration {}: {:?}", iteration, path);

        Ok(CheckpointRecord {
            iteration,
            loss,
            path,
        })
    }
}

/// Loads the parameters stored at `path` into `model`.
pub fn restore<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let model = model
        .load_file(path.to_path_buf(), &SnapshotRecorder::new(), device)
        .map_err(|e| anyhow::anyhow!("failed to load model weights from {:?}: {e}", path))?;

    info!("Model weights restored from {:?}", path);
    Ok(model)
}

/// Snapshots in `dir` whose file names follow the checkpoint naming scheme,
/// sorted by iteration.
pub fn list_checkpoints(dir: &Path) -> Result<Vec<CheckpointRecord>> {
    if !dir.exists() {
        warn!("Snapshot directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let pattern = Regex::new(r"^.+__(?P<iteration>\d+)_(?P<loss>[^_]+)\.mpk$")
        .context("invalid checkpoint pattern")?;

    let mut checkpoints = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        let Some(captures) = pattern.captures(&name) else {
            continue;
        };
        let (Ok(iteration), Ok(loss)) = (
            captures["iteration"].parse::<usize>(),
            captures["loss"].parse::<f32>(),
        ) else {
            continue;
        };
        checkpoints.push(CheckpointRecord {
            iteration,
            loss,
            path: entry.path().to_path_buf(),
        });
    }

    checkpoints.sort_by(|a, b| {
        a.iteration
            .cmp(&b.iteration)
            .then(a.loss.total_cmp(&b.loss))
    });

    Ok(checkpoints)
}

/// Pretty-printed JSON next to the snapshots (run config, run summary).
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {:?}", path))?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PixelLinear, Segmenter};
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_list_empty_checkpoints() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoints = list_checkpoints(temp_dir.path()).unwrap();
        assert_eq!(checkpoints.len(), 0);
        assert!(list_checkpoints(&temp_dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn names_embed_iteration_and_loss() {
        let temp_dir = TempDir::new().unwrap();
        let writer = CheckpointWriter::create(temp_dir.path().join("snapshot")).unwrap();
        assert!(writer.dir().is_dir());
        assert_eq!(
            writer.path_for(12, 0.25),
            temp_dir.path().join("snapshot").join("unet__12_0.25.mpk")
        );
    }

    #[test]
    fn saved_snapshots_are_listed_and_restorable() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let writer = CheckpointWriter::create(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("config.json"), "{}").unwrap();

        let model = PixelLinear::<TestBackend>::new(3, 1, &device);
        writer.save(&model, 7, 0.5).unwrap();
        let saved = writer.save(&model, 3, 0.75).unwrap();
        assert!(saved.path.is_file());

        let listed = list_checkpoints(temp_dir.path()).unwrap();
        let keys: Vec<(usize, f32)> = listed.iter().map(|c| (c.iteration, c.loss)).collect();
        assert_eq!(keys, vec![(3, 0.75), (7, 0.5)]);

        let fresh = PixelLinear::<TestBackend>::new(3, 1, &device);
        let restored = restore(fresh, &saved.path, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([1, 3, 2, 2], Distribution::Default, &device);
        let expected = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = restored.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn restoring_a_missing_snapshot_fails() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = PixelLinear::<TestBackend>::new(3, 1, &device);
        assert!(restore(model, &temp_dir.path().join("gone.mpk"), &device).is_err());
    }
}
