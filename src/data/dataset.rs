use burn::data::dataset::Dataset;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::augment::{image_to_chw, label_to_plane, Augmentation};
use crate::config::TrainingConfig;
use crate::error::DataError;

/// One line of the data list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub image: PathBuf,
    pub label: PathBuf,
    pub name: String,
}

/// A prepared sample: CHW image data, single-plane label and its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct XrayItem {
    pub image: Vec<f32>,
    pub label: Vec<f32>,
    pub name: String,
}

/// Reads `"<image> <label>"` lines, resolving both paths against `data_dir`.
pub fn read_data_list(data_dir: &Path, list_path: &Path) -> Result<Vec<SampleEntry>, DataError> {
    if !data_dir.is_dir() {
        return Err(DataError::MissingDir(data_dir.to_path_buf()));
    }
    let contents = fs::read_to_string(list_path).map_err(|source| DataError::ListRead {
        path: list_path.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let (image, label) = match (fields.next(), fields.next()) {
            (None, _) => continue,
            (Some(image), Some(label)) => (image, label),
            (Some(_), None) => {
                return Err(DataError::MalformedLine {
                    path: list_path.to_path_buf(),
                    line: line_no + 1,
                })
            }
        };
        let name = Path::new(image)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.to_string());
        entries.push(SampleEntry {
            image: data_dir.join(image),
            label: data_dir.join(label),
            name,
        });
    }

    if entries.is_empty() {
        return Err(DataError::Empty(list_path.to_path_buf()));
    }
    Ok(entries)
}

/// Image/label pairs from a data list, repeated to a fixed number of samples.
///
/// Images are decoded lazily in [`Dataset::get`], which runs on the data
/// loader's worker threads.
#[derive(Debug, Clone)]
pub struct XrayDataset {
    entries: Vec<SampleEntry>,
    len: usize,
    augmentation: Augmentation,
}

impl XrayDataset {
    pub fn new(entries: Vec<SampleEntry>, len: usize, augmentation: Augmentation) -> Self {
        let len = if entries.is_empty() { 0 } else { len };
        Self {
            entries,
            len,
            augmentation,
        }
    }

    /// Builds the dataset described by `config`, expanded to `num_steps * batch_size` samples.
    pub fn from_config(config: &TrainingConfig) -> Result<Self, DataError> {
        let entries = read_data_list(&config.data_dir, &config.data_list)?;
        if let Some(missing) = entries
            .iter()
            .flat_map(|entry| [&entry.image, &entry.label])
            .find(|path| !path.is_file())
        {
            return Err(DataError::MissingFile(missing.clone()));
        }
        for path in entries.iter().flat_map(|entry| [&entry.image, &entry.label]) {
            image::image_dimensions(path).map_err(|source| DataError::Image {
                path: path.clone(),
                source,
            })?;
        }

        info!(
            "Loaded {} samples from {:?}, expanded to {}",
            entries.len(),
            config.data_list,
            config.max_iters()
        );

        let augmentation = Augmentation {
            crop: config.input_size,
            mirror: config.random_mirror,
            scale: config.random_scale,
            ignore_label: config.ignore_label,
            seed: config.random_seed,
        };
        Ok(Self::new(entries, config.max_iters(), augmentation))
    }

    pub fn num_unique(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: usize) -> Option<&SampleEntry> {
        if index >= self.len {
            return None;
        }
        self.entries.get(index % self.entries.len())
    }

    /// Decodes and augments sample `index`.
    pub fn load(&self, index: usize) -> Result<Option<XrayItem>, DataError> {
        let Some(entry) = self.entry(index) else {
            return Ok(None);
        };
        let image = image::open(&entry.image)
            .map_err(|source| DataError::Image {
                path: entry.image.clone(),
                source,
            })?
            .to_rgb8();
        let label = image::open(&entry.label)
            .map_err(|source| DataError::Image {
                path: entry.label.clone(),
                source,
            })?
            .to_luma8();

        let (image, label) = self.augmentation.apply(&image, &label, index);
        Ok(Some(XrayItem {
            image: image_to_chw(&image),
            label: label_to_plane(&label),
            name: entry.name.clone(),
        }))
    }
}

impl Dataset<XrayItem> for XrayDataset {
    fn get(&self, index: usize) -> Option<XrayItem> {
        match self.load(index) {
            Ok(item) => item,
            Err(err) => {
                // The loader stops on `None`; the trainer rejects the short batch.
                error!("Failed to load sample {}: {}", index, err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}
